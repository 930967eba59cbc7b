//! Build identity and its staging directory token.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Result, StagingError};

/// Separator between the encoded name and number. Not part of the
/// URL-safe base64 alphabet, so the token is unambiguous.
const TOKEN_SEPARATOR: char = '.';

/// Longest token used verbatim. Most filesystems cap a path component at
/// 255 bytes; longer tokens are replaced by their hex SHA-256.
const MAX_TOKEN_LEN: usize = 200;

/// A (build name, build number) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildId {
    name: String,
    number: String,
}

impl BuildId {
    /// Both parts must be non-empty.
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let number = number.into();
        if name.trim().is_empty() {
            return Err(StagingError::InvalidBuildId(
                "build name must not be empty".to_string(),
            ));
        }
        if number.trim().is_empty() {
            return Err(StagingError::InvalidBuildId(
                "build number must not be empty".to_string(),
            ));
        }
        Ok(BuildId { name, number })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Filesystem-safe directory name for this build.
    ///
    /// Name and number are encoded separately so that distinct pairs never
    /// share a token, even when the parts themselves contain `_` or `/`.
    /// Oversized tokens become a 64-character digest, which has no
    /// separator and so never equals an encoded token.
    pub fn dir_token(&self) -> String {
        let token = format!(
            "{}{}{}",
            URL_SAFE_NO_PAD.encode(self.name.as_bytes()),
            TOKEN_SEPARATOR,
            URL_SAFE_NO_PAD.encode(self.number.as_bytes())
        );
        if token.len() <= MAX_TOKEN_LEN {
            return token;
        }
        hex::encode(Sha256::digest(token.as_bytes()))
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_deterministic() {
        let a = BuildId::new("my-build", "42").unwrap();
        let b = BuildId::new("my-build", "42").unwrap();
        assert_eq!(a.dir_token(), b.dir_token());
    }

    #[test]
    fn token_separates_ambiguous_pairs() {
        let a = BuildId::new("a_b", "c").unwrap();
        let b = BuildId::new("a", "b_c").unwrap();
        assert_ne!(a.dir_token(), b.dir_token());
    }

    #[test]
    fn token_is_filesystem_safe() {
        let id = BuildId::new("team/app: nightly", "2026.10/18?").unwrap();
        let token = id.dir_token();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn long_names_fall_back_to_digest() {
        let long = "n".repeat(300);
        let token = BuildId::new(long.as_str(), "1").unwrap().dir_token();
        assert_eq!(token.len(), 64);
        assert!(!token.contains(TOKEN_SEPARATOR));
        assert_eq!(token, BuildId::new(long.as_str(), "1").unwrap().dir_token());
        assert_ne!(token, BuildId::new(long.as_str(), "2").unwrap().dir_token());
    }

    #[test]
    fn short_tokens_stay_readable() {
        let token = BuildId::new("n".repeat(140), "1").unwrap().dir_token();
        assert!(token.len() <= MAX_TOKEN_LEN);
        assert!(token.contains(TOKEN_SEPARATOR));
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(matches!(
            BuildId::new("", "1"),
            Err(StagingError::InvalidBuildId(_))
        ));
        assert!(matches!(
            BuildId::new("b", "  "),
            Err(StagingError::InvalidBuildId(_))
        ));
    }

    #[test]
    fn display_is_name_slash_number() {
        let id = BuildId::new("b", "7").unwrap();
        assert_eq!(id.to_string(), "b/7");
    }
}
