use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest code the receive box accepts unless configured otherwise.
pub const DEFAULT_MAX_CODE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("code is empty")]
    Empty,
    #[error("code contains non-alphabetic character {0:?}")]
    NonAlphabetic(char),
    #[error("code is {len} characters long (limit: {limit})")]
    TooLong { len: usize, limit: usize },
}

/// A normalized transfer code: trimmed, ASCII alphabetic, lower-case.
///
/// Two codes that differ only in casing or surrounding whitespace parse to
/// the same value, so equality on `TransferCode` is the case-insensitive
/// comparison the store keys on.
///
/// Deserialization goes through the same validation with no length cap;
/// the cap is a receive-side policy, not a property of stored codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransferCode(String);

impl TransferCode {
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CodeError::Empty);
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphabetic()) {
            return Err(CodeError::NonAlphabetic(bad));
        }
        if trimmed.len() > max_len {
            return Err(CodeError::TooLong {
                len: trimmed.len(),
                limit: max_len,
            });
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for TransferCode {
    type Error = CodeError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw, usize::MAX)
    }
}

impl From<TransferCode> for String {
    fn from(code: TransferCode) -> Self {
        code.0
    }
}

impl fmt::Display for TransferCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TransferCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
