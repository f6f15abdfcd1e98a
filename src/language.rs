//! User-facing messages in English or Vietnamese, picked from the question.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VIETNAMESE_CHARS: Regex = Regex::new(concat!(
        r"[\x{0103}\x{00e2}\x{0111}\x{00ea}\x{00f4}\x{01a1}\x{01b0}",
        r"\x{00e1}\x{00e0}\x{1ea3}\x{00e3}\x{1ea1}\x{1eaf}\x{1eb1}\x{1eb3}\x{1eb5}\x{1eb7}\x{1ea5}\x{1ea7}\x{1ea9}\x{1eab}\x{1ead}",
        r"\x{00e9}\x{00e8}\x{1ebb}\x{1ebd}\x{1eb9}\x{1ebf}\x{1ec1}\x{1ec3}\x{1ec5}\x{1ec7}",
        r"\x{00ed}\x{00ec}\x{1ec9}\x{0129}\x{1ecb}",
        r"\x{00f3}\x{00f2}\x{1ecf}\x{00f5}\x{1ecd}\x{1ed1}\x{1ed3}\x{1ed5}\x{1ed7}\x{1ed9}\x{1edb}\x{1edd}\x{1edf}\x{1ee1}\x{1ee3}",
        r"\x{00fa}\x{00f9}\x{1ee7}\x{0169}\x{1ee5}\x{1ee9}\x{1eeb}\x{1eed}\x{1eef}\x{1ef1}",
        r"\x{00fd}\x{1ef3}\x{1ef7}\x{1ef9}\x{1ef5}]"
    ))
    .unwrap();
    static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref UNACCENTED_HINTS: Regex = Regex::new(
        r"\b(?:bao\s+nhieu|trong|hay|cho\s+biet|tinh|thang|nam|chuyen|doanh\s+thu|du\s+lieu)\b"
    )
    .unwrap();
}

/// Vietnamese diacritics, or one of the common unaccented Vietnamese
/// question words as a whole word.
pub fn is_probably_vietnamese(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if VIETNAMESE_CHARS.is_match(&lowered) {
        return true;
    }
    let normalized = PUNCTUATION.replace_all(&lowered, " ");
    UNACCENTED_HINTS.is_match(&normalized)
}

pub fn fallback_no_data_message(question: &str) -> String {
    if is_probably_vietnamese(question) {
        "Không có dữ liệu phù hợp với điều kiện truy vấn.".to_string()
    } else {
        "No matching data was found for the query conditions.".to_string()
    }
}

pub fn fallback_success_message(question: &str, row_count: usize) -> String {
    if is_probably_vietnamese(question) {
        format!(
            "Đã truy vấn thành công {} dòng (hiển thị tối đa theo cấu hình).",
            row_count
        )
    } else {
        format!(
            "Query succeeded with {} rows (showing up to configured limit).",
            row_count
        )
    }
}

pub fn unsupported_message(question: &str, reason: &str) -> String {
    if is_probably_vietnamese(question) {
        format!(
            "Không thể trả lời yêu cầu này từ schema PostgreSQL hiện tại.\nLý do: {}",
            reason
        )
    } else {
        format!(
            "I cannot answer this request from the current PostgreSQL schema.\nReason: {}",
            reason
        )
    }
}

pub fn error_after_retry_message(question: &str, sql_query: &str, sql_error: &str) -> String {
    if is_probably_vietnamese(question) {
        format!(
            "Thực thi truy vấn thất bại sau khi đã thử sửa SQL.\nCâu hỏi: {}\nSQL: {}\nLỗi: {}",
            question, sql_query, sql_error
        )
    } else {
        format!(
            "Query execution failed after retry.\nQuestion: {}\nSQL: {}\nError: {}",
            question, sql_query, sql_error
        )
    }
}

pub fn empty_question_message() -> String {
    "Câu hỏi đang trống. Vui lòng nhập câu hỏi phân tích dữ liệu taxi.\n\
     The question is empty. Please provide a taxi analytics question."
        .to_string()
}

pub fn internal_error_message(question: &str) -> String {
    if is_probably_vietnamese(question) {
        "Hệ thống gặp lỗi nội bộ khi xử lý yêu cầu. Vui lòng thử lại sau.".to_string()
    } else {
        "The system encountered an internal error while processing your request. Please try again."
            .to_string()
    }
}
