//! SQL Lexer
//!
//! Thin layer over the `sqlparser` PostgreSQL tokenizer. The guard only
//! needs to tell apart words, quoted identifiers, literals, comments and
//! the punctuation that shapes statements (parentheses, commas, dots,
//! semicolons), so every other token collapses into `Operator`.

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token as SqlToken, Tokenizer, TokenizerError, Whitespace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted word: keyword or bare identifier.
    Word,
    /// `"Double Quoted"` identifier; `text` holds the unquoted value.
    QuotedIdent,
    /// `'...'`, `E'...'`, `N'...'`, `X'...'` or `$tag$...$tag$`.
    StringLiteral,
    Number,
    LineComment,
    BlockComment,
    Whitespace,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Whitespace and comments carry no SQL meaning.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    /// Identifier text, case folded.
    pub fn normalized(&self) -> String {
        self.text.to_lowercase()
    }
}

/// Tokenize the whole input, trivia included. Unterminated literals,
/// quoted identifiers and block comments are errors.
///
/// PostgreSQL ends a `--` comment at either `\r` or `\n`; the tokenizer
/// only knows `\n`, so carriage returns are turned into newlines first.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    let source = sql.replace('\r', "\n");
    let dialect = PostgreSqlDialect {};
    let raw = Tokenizer::new(&dialect, &source).tokenize()?;

    Ok(raw.into_iter().filter_map(convert).collect())
}

/// Tokens without whitespace and comments.
pub fn significant_tokens(sql: &str) -> Result<Vec<Token>, TokenizerError> {
    Ok(tokenize(sql)?
        .into_iter()
        .filter(|token| !token.is_trivia())
        .collect())
}

fn convert(token: SqlToken) -> Option<Token> {
    let converted = match token {
        SqlToken::EOF => return None,
        SqlToken::Word(word) => match word.quote_style {
            Some(_) => Token::new(TokenKind::QuotedIdent, word.value),
            None => Token::new(TokenKind::Word, word.value),
        },
        SqlToken::Number(digits, _) => Token::new(TokenKind::Number, digits),
        SqlToken::SingleQuotedString(_)
        | SqlToken::EscapedStringLiteral(_)
        | SqlToken::NationalStringLiteral(_)
        | SqlToken::HexStringLiteral(_)
        | SqlToken::DollarQuotedString(_) => {
            Token::new(TokenKind::StringLiteral, token.to_string())
        }
        SqlToken::Whitespace(Whitespace::SingleLineComment { .. }) => {
            Token::new(TokenKind::LineComment, token.to_string())
        }
        SqlToken::Whitespace(Whitespace::MultiLineComment(_)) => {
            Token::new(TokenKind::BlockComment, token.to_string())
        }
        SqlToken::Whitespace(_) => Token::new(TokenKind::Whitespace, token.to_string()),
        SqlToken::LParen => Token::new(TokenKind::LParen, "("),
        SqlToken::RParen => Token::new(TokenKind::RParen, ")"),
        SqlToken::Comma => Token::new(TokenKind::Comma, ","),
        SqlToken::Period => Token::new(TokenKind::Dot, "."),
        SqlToken::SemiColon => Token::new(TokenKind::Semicolon, ";"),
        other => Token::new(TokenKind::Operator, other.to_string()),
    };
    Some(converted)
}
