//! Rendezvous tokens for spawned user services.
//!
//! A separately launched service process has no direct reference to the
//! record that asked for it. The broker embeds a [`ServiceToken`] in the
//! launch command; the process hands it back together with its handle, and
//! the broker uses it to find the waiting record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique, broker-generated correlation token.
///
/// # Example
///
/// ```
/// use aegis_types::ServiceToken;
///
/// let a = ServiceToken::generate();
/// let b = ServiceToken::generate();
/// assert_ne!(a, b);
///
/// // Tokens coming back from a spawned process are parsed verbatim.
/// let echoed = ServiceToken::from(a.as_str());
/// assert_eq!(echoed, a);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceToken(String);

impl ServiceToken {
    /// Generates a fresh token: a random UUID suffixed with the wall-clock millis.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self(format!("{}-{millis}", Uuid::new_v4()))
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServiceToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_are_unique() {
        let tokens: HashSet<_> = (0..256).map(|_| ServiceToken::generate()).collect();
        assert_eq!(tokens.len(), 256);
    }

    #[test]
    fn generated_token_has_uuid_and_millis() {
        let token = ServiceToken::generate();
        let (uuid_part, millis) = token.as_str().rsplit_once('-').expect("millis suffix");
        assert!(Uuid::parse_str(uuid_part).is_ok(), "got: {token}");
        assert!(millis.parse::<u128>().is_ok(), "got: {token}");
    }

    #[test]
    fn serde_is_plain_string() {
        let token = ServiceToken::from("abc-1");
        let json = serde_json::to_string(&token).expect("serialize");
        assert_eq!(json, r#""abc-1""#);
    }
}
