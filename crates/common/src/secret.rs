//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types. Use them for the backend API token and
//! anything else that must never reach a log line.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` while holding a secret is automatically safe to trace.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct BackendCredentials {
//!     base_url: String,
//!     api_token: SecretString,
//! }
//!
//! let creds = BackendCredentials {
//!     base_url: "https://api.example.com".to_string(),
//!     api_token: SecretString::from("tok-123"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("tok-123"));
//! assert_eq!(creds.api_token.expose_secret(), "tok-123");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("bearer-abc");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("bearer-abc"));
    }

    #[test]
    fn test_deserialize_token() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct TokenFile {
            issuer: String,
            token: SecretString,
        }

        let json = r#"{"issuer": "backend", "token": "session-api-token"}"#;
        let parsed: TokenFile = serde_json::from_str(json).expect("deserialize");

        assert_eq!(parsed.token.expose_secret(), "session-api-token");
        assert!(!format!("{parsed:?}").contains("session-api-token"));
    }
}
