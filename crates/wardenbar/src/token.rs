//! Session token storage
//!
//! The token handed out by `bw unlock` / `bw login` lives in the OS keyring
//! between invocations and is never written to disk by wardenbar.

use std::cell::RefCell;
use tracing::debug;

use crate::error::{preview, Result, WardenError};

const KEYRING_SERVICE: &str = "wardenbar";
const KEYRING_USER: &str = "bw-session";

/// Holder of the bearer session token
pub trait TokenStore {
    fn get(&self) -> Result<String>;
    fn set(&self, token: &str) -> Result<()>;
    /// Removing an absent token is not an error
    fn remove(&self) -> Result<()>;
}

/// Token store backed by the platform keyring
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    user: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_USER)
    }
}

impl KeyringTokenStore {
    pub fn new(service: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            user: user.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| WardenError::TokenUnavailable(format!("keyring: {e}")))
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self) -> Result<String> {
        match self.entry()?.get_password() {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) | Err(keyring::Error::NoEntry) => {
                Err(WardenError::TokenUnavailable("no session token stored".to_string()))
            }
            Err(e) => Err(WardenError::TokenUnavailable(format!("keyring read error: {e}"))),
        }
    }

    fn set(&self, token: &str) -> Result<()> {
        debug!("storing session token {}", preview(token));
        self.entry()?
            .set_password(token)
            .map_err(|e| WardenError::TokenUnavailable(format!("keyring write error: {e}")))
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(WardenError::TokenUnavailable(format!("keyring delete error: {e}"))),
        }
    }
}

/// In-process token store, for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RefCell<Option<String>>,
}

impl MemoryTokenStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: RefCell::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<String> {
        self.token
            .borrow()
            .clone()
            .ok_or_else(|| WardenError::TokenUnavailable("no session token stored".to_string()))
    }

    fn set(&self, token: &str) -> Result<()> {
        *self.token.borrow_mut() = Some(token.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.token.borrow_mut().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lifecycle() {
        let store = MemoryTokenStore::default();
        assert!(matches!(store.get(), Err(WardenError::TokenUnavailable(_))));

        store.set("abc").unwrap();
        assert_eq!(store.get().unwrap(), "abc");

        store.remove().unwrap();
        store.remove().unwrap();
        assert!(store.get().is_err());
    }

    #[test]
    fn test_with_token() {
        assert_eq!(MemoryTokenStore::with_token("t").get().unwrap(), "t");
    }
}
