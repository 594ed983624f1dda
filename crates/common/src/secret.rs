//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Room credentials
//! (transport join tokens) are carried as [`SecretString`] from the moment
//! they enter the system, so any struct deriving `Debug` that holds one is
//! safe to log.
//!
//! # Credential Sentinels
//!
//! Upstream callers sometimes hand over a missing credential as the empty
//! string or as the literal text `"null"` / `"undefined"`. These must never
//! reach the transport as a real token; [`normalize_credential`] folds all of
//! them into `None`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{normalize_credential, ExposeSecret};
//!
//! assert!(normalize_credential(Some("undefined")).is_none());
//!
//! let token = normalize_credential(Some("006abc")).unwrap();
//! assert_eq!(token.expose_secret(), "006abc");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Textual values upstream uses to mean "no credential".
const CREDENTIAL_SENTINELS: [&str; 3] = ["", "null", "undefined"];

/// Normalize a raw credential into an optional secret.
///
/// Returns `None` for a missing value and for every sentinel in
/// [`CREDENTIAL_SENTINELS`]. Any other value is wrapped unchanged.
#[must_use]
pub fn normalize_credential(raw: Option<&str>) -> Option<SecretString> {
    match raw {
        None => None,
        Some(value) if CREDENTIAL_SENTINELS.contains(&value) => None,
        Some(value) => Some(SecretString::from(value.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_normalize_credential_sentinels() {
        assert!(normalize_credential(None).is_none());
        assert!(normalize_credential(Some("")).is_none());
        assert!(normalize_credential(Some("null")).is_none());
        assert!(normalize_credential(Some("undefined")).is_none());
    }

    #[test]
    fn test_normalize_credential_keeps_real_tokens() {
        let token = normalize_credential(Some("007eJxTYBD")).unwrap();
        assert_eq!(token.expose_secret(), "007eJxTYBD");

        // Only exact sentinels are folded; whitespace is a real value.
        let spaced = normalize_credential(Some(" null")).unwrap();
        assert_eq!(spaced.expose_secret(), " null");
    }

    #[test]
    fn test_struct_with_credential_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct JoinRequest {
            room: String,
            credential: Option<SecretString>,
        }

        let req = JoinRequest {
            room: "room-1".to_string(),
            credential: normalize_credential(Some("super-secret")),
        };

        let debug_str = format!("{req:?}");
        assert!(debug_str.contains("room-1"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct RoomGrant {
            room: String,
            token: SecretString,
        }

        let json = r#"{"room": "lobby", "token": "my-secret-value"}"#;
        let grant: RoomGrant = serde_json::from_str(json).expect("deserialize");

        assert_eq!(grant.token.expose_secret(), "my-secret-value");
        let debug = format!("{grant:?}");
        assert!(!debug.contains("my-secret-value"));
    }
}
