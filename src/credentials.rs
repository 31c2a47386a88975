//! Credential store: access token, refresh token and the cached user.
//!
//! Pure key-value persistence. The only rule it knows is that a missing
//! access token means "not authenticated".

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DocError, DocResult};
use crate::storage::KeyValueStore;

pub const TOKEN_KEY: &str = "legal_tech_token";
pub const REFRESH_TOKEN_KEY: &str = "legal_tech_refresh_token";
pub const USER_KEY: &str = "legal_tech_user";

pub struct CredentialStore<S> {
    storage: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // --- Access token ---

    /// An empty stored token counts as absent.
    pub fn get_token(&self) -> Option<String> {
        self.storage.get(TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn set_token(&self, token: &str) -> DocResult<()> {
        self.storage
            .set(TOKEN_KEY, token)
            .map_err(|e| e.in_op("credentials.set_token"))
    }

    pub fn remove_token(&self) -> DocResult<()> {
        self.storage
            .delete(TOKEN_KEY)
            .map(|_| ())
            .map_err(|e| e.in_op("credentials.remove_token"))
    }

    // --- Refresh token ---

    pub fn get_refresh_token(&self) -> Option<String> {
        self.storage.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn set_refresh_token(&self, token: &str) -> DocResult<()> {
        self.storage
            .set(REFRESH_TOKEN_KEY, token)
            .map_err(|e| e.in_op("credentials.set_refresh_token"))
    }

    pub fn remove_refresh_token(&self) -> DocResult<()> {
        self.storage
            .delete(REFRESH_TOKEN_KEY)
            .map(|_| ())
            .map_err(|e| e.in_op("credentials.remove_refresh_token"))
    }

    // --- Cached user ---

    /// Cached user, or `None` when absent or not decodable as `T`.
    pub fn get_user<T: DeserializeOwned>(&self) -> Option<T> {
        let raw = self.storage.get(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "cached user is not decodable, ignoring");
                None
            }
        }
    }

    pub fn set_user<T: Serialize>(&self, user: &T) -> DocResult<()> {
        let raw = serde_json::to_string(user)
            .map_err(|e| DocError::from(e).in_op("credentials.set_user"))?;
        self.storage
            .set(USER_KEY, &raw)
            .map_err(|e| e.in_op("credentials.set_user"))
    }

    pub fn remove_user(&self) -> DocResult<()> {
        self.storage
            .delete(USER_KEY)
            .map(|_| ())
            .map_err(|e| e.in_op("credentials.remove_user"))
    }

    /// Removes all three keys. A storage failure is reported after every
    /// key has been dropped, never half-way through.
    pub fn clear_all(&self) -> DocResult<()> {
        self.storage
            .delete_all(&[TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY])
            .map(|_| ())
            .map_err(|e| e.in_op("credentials.clear_all"))
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_token().is_some()
    }
}
