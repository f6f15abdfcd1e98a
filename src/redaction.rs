//! Credential Redaction
//!
//! Masks passwords, API keys and bearer tokens in error text before it is
//! logged or handed back to a caller.

use lazy_static::lazy_static;
use regex::Regex;

pub const REDACTED: &str = "***";

lazy_static! {
    static ref POSTGRES_URL_PASSWORD: Regex =
        Regex::new(r"(?i)(postgres(?:ql)?://[^:\s/]+:)([^@/\s]+)(@)").unwrap();
    static ref DSN_PASSWORD: Regex = Regex::new(r"(?i)(password=)([^\s]+)").unwrap();
    static ref API_KEY: Regex =
        Regex::new(r"(?i)(api[_-]?key(?:\s*[:=]\s*|\s+))([^\s,;]+)").unwrap();
    static ref BEARER: Regex = Regex::new(r"(?i)(authorization:\s*bearer\s+)([^\s]+)").unwrap();
}

/// Replace every credential-looking fragment with [`REDACTED`].
pub fn redact_sensitive_text(text: &str) -> String {
    let redacted = POSTGRES_URL_PASSWORD.replace_all(text, format!("${{1}}{}${{3}}", REDACTED));
    let redacted = DSN_PASSWORD.replace_all(&redacted, format!("${{1}}{}", REDACTED));
    let redacted = API_KEY.replace_all(&redacted, format!("${{1}}{}", REDACTED));
    let redacted = BEARER.replace_all(&redacted, format!("${{1}}{}", REDACTED));
    redacted.into_owned()
}
