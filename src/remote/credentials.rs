//! Remote API token management using system keyring

use keyring::Entry;

use super::error::RemoteError;

/// Service name for keyring storage
const SERVICE_NAME: &str = "vocab-drill";
/// Entry name for the token
const TOKEN_ENTRY: &str = "remote-api-token";

/// Manages the remote store token in the system keyring
pub struct TokenManager;

impl TokenManager {
    /// Get the token from system keyring
    pub fn get_token() -> Result<String, RemoteError> {
        let entry = Self::entry()?;

        entry.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => RemoteError::TokenNotFound,
            _ => RemoteError::Keyring(e.to_string()),
        })
    }

    /// Store the token in system keyring
    pub fn set_token(token: &str) -> Result<(), RemoteError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(RemoteError::InvalidArgument("token is empty".to_string()));
        }

        Self::entry()?.set_password(token).map_err(|e| RemoteError::Keyring(e.to_string()))
    }

    /// Delete the stored token
    pub fn delete_token() -> Result<(), RemoteError> {
        Self::entry()?.delete_credential().map_err(|e| RemoteError::Keyring(e.to_string()))
    }

    fn entry() -> Result<Entry, RemoteError> {
        Entry::new(SERVICE_NAME, TOKEN_ENTRY).map_err(|e| RemoteError::Keyring(e.to_string()))
    }

    /// Mask a token for display (show first and last 4 chars)
    pub fn mask(token: &str) -> String {
        let len = token.chars().count();
        if len <= 12 {
            return "*".repeat(len);
        }
        let prefix: String = token.chars().take(4).collect();
        let mut suffix: Vec<char> = token.chars().rev().take(4).collect();
        suffix.reverse();
        format!("{}...{}", prefix, suffix.into_iter().collect::<String>())
    }
}
