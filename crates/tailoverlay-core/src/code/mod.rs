//! Workspace code generation and validation.
//!
//! A workspace is identified by a six digit numeric code that the host reads
//! out to the joining device.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tailoverlay_core::code::WorkspaceCode;
//!
//! let code = WorkspaceCode::generate();
//! println!("Join with: {}", code);
//!
//! let code = WorkspaceCode::parse("482913")?;
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a workspace code
pub const CODE_LENGTH: usize = 6;

/// A validated workspace code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceCode {
    code: String,
}

impl WorkspaceCode {
    /// Parse and validate a workspace code from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is not exactly six ASCII digits.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim();

        if normalized.len() != CODE_LENGTH {
            return Err(Error::InvalidCodeFormat(format!(
                "code must be {} digits, got {}",
                CODE_LENGTH,
                normalized.len()
            )));
        }

        if let Some(c) = normalized.chars().find(|c| !c.is_ascii_digit()) {
            return Err(Error::InvalidCodeFormat(format!(
                "invalid character '{c}' in code"
            )));
        }

        Ok(Self {
            code: normalized.to_string(),
        })
    }

    /// Generate a new random workspace code.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();

        Self { code }
    }

    /// Check whether a code submitted by a peer matches this one.
    ///
    /// Malformed input simply does not match.
    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        submitted.trim() == self.code
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for WorkspaceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl std::str::FromStr for WorkspaceCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkspaceCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WorkspaceCode> for String {
    fn from(code: WorkspaceCode) -> Self {
        code.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let code = WorkspaceCode::parse("482913").unwrap();
        assert_eq!(code.as_str(), "482913");

        let code = WorkspaceCode::parse("  000042 ").unwrap();
        assert_eq!(code.as_str(), "000042");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(WorkspaceCode::parse("12345").is_err());
        assert!(WorkspaceCode::parse("1234567").is_err());
        assert!(WorkspaceCode::parse("12a456").is_err());
        assert!(WorkspaceCode::parse("").is_err());
    }

    #[test]
    fn test_generate() {
        for _ in 0..100 {
            let code = WorkspaceCode::generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(WorkspaceCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn test_matches() {
        let code = WorkspaceCode::parse("482913").unwrap();
        assert!(code.matches("482913"));
        assert!(code.matches(" 482913\n"));
        assert!(!code.matches("482914"));
        assert!(!code.matches("48291"));
        assert!(!code.matches(""));
    }

    #[test]
    fn test_display() {
        let code = WorkspaceCode::parse("100200").unwrap();
        assert_eq!(format!("{code}"), "100200");
    }

    #[test]
    fn test_serde_as_string() {
        let code = WorkspaceCode::parse("482913").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"482913\"");

        let back: WorkspaceCode = serde_json::from_str("\"482913\"").unwrap();
        assert_eq!(back, code);
        assert!(serde_json::from_str::<WorkspaceCode>("\"abc\"").is_err());
    }
}
