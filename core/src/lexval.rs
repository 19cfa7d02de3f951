//! Lexical values: the immutable token-like record AST builders consume.

use crate::types::TokenCategory;
use std::fmt;

/// The typed payload a `LexicalValue` carries, discriminated by the
/// originating token's shape rather than by `TokenCategory` (an identifier,
/// an operator and a special-character token all carry a `Name`).
#[derive(Debug, Clone, PartialEq)]
pub enum LexPayload {
    /// Identifier, operator, special-character or string-literal text.
    Name(String),
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
}

impl fmt::Display for LexPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexPayload::Name(s) => write!(f, "{s}"),
            LexPayload::Int(v) => write!(f, "{v}"),
            LexPayload::Float(v) => write!(f, "{v}"),
            LexPayload::Char(v) => write!(f, "'{v}'"),
            LexPayload::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// An immutable record bundling source line, token category and payload
/// (spec §3). Owned by the AST node that wraps it.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalValue {
    pub line: usize,
    pub category: TokenCategory,
    pub payload: LexPayload,
}

impl LexicalValue {
    pub fn new(line: usize, category: TokenCategory, payload: LexPayload) -> Self {
        LexicalValue { line, category, payload }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.payload {
            LexPayload::Name(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for LexicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_extracts_identifier_text() {
        let lv = LexicalValue::new(3, TokenCategory::Identifier, LexPayload::Name("x".into()));
        assert_eq!(lv.name(), Some("x"));
    }

    #[test]
    fn name_is_none_for_numeric_literal() {
        let lv = LexicalValue::new(1, TokenCategory::Literal, LexPayload::Int(5));
        assert_eq!(lv.name(), None);
    }

    #[test]
    fn display_renders_payload() {
        let lv = LexicalValue::new(1, TokenCategory::Literal, LexPayload::Int(42));
        assert_eq!(lv.to_string(), "42");
    }
}
