use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use crate::cache::progress_prefix;
use crate::models::{Credential, User};

const TOKEN_KEY: &str = "token";
const EXPIRES_AT_KEY: &str = "token_expires_at";
const USER_KEY: &str = "user";

/// Single source of truth for "am I authenticated".
///
/// Keeps an in-memory copy of the credential for the request path and writes
/// through to a `KeyValueStore` so the session survives restarts. Token,
/// expiry and user are always written in one batch.
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    current: RwLock<Option<Credential>>,
    auth_header: RwLock<Option<String>>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
            auth_header: RwLock::new(None),
        }
    }

    /// Read the persisted credential into memory.
    /// A partial record (token without expiry or user) counts as no credential.
    pub fn load(&self) -> Result<Option<Credential>> {
        let token = self.storage.get(TOKEN_KEY)?;
        let expires_at = self.storage.get(EXPIRES_AT_KEY)?;
        let user = self.storage.get(USER_KEY)?;

        let credential = match (token, expires_at, user) {
            (Some(token), Some(expires_at), Some(user)) => {
                let expires_at = DateTime::parse_from_rfc3339(&expires_at)
                    .context("Failed to parse stored token expiry")?
                    .with_timezone(&Utc);
                let user: User =
                    serde_json::from_str(&user).context("Failed to parse stored user")?;
                Some(Credential::new(token, expires_at, user))
            }
            (None, None, None) => None,
            _ => {
                debug!("Stored credential is incomplete, ignoring it");
                None
            }
        };

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = credential.clone();
        Ok(credential)
    }

    /// Replace the credential. Memory is updated even if the write fails.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(credential.clone());
        self.persist(credential)
    }

    /// Replace the credential only while `expected` is still the stored token.
    ///
    /// The check and both writes happen under the credential lock, so a
    /// concurrent `clear` or `save` either lands first (and this returns
    /// `false`) or waits for this one to finish.
    pub fn replace_if_current(&self, expected: &str, credential: &Credential) -> Result<bool> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|c| c.token.as_str()) != Some(expected) {
            debug!("Stored token changed, not replacing");
            return Ok(false);
        }
        *current = Some(credential.clone());
        self.set_auth_header(Some(&credential.token));
        self.persist(credential)?;
        Ok(true)
    }

    fn persist(&self, credential: &Credential) -> Result<()> {
        let user = serde_json::to_string(&credential.user)?;
        self.storage
            .set_many(&[
                (TOKEN_KEY, credential.token.clone()),
                (EXPIRES_AT_KEY, credential.expires_at.to_rfc3339()),
                (USER_KEY, user),
            ])
            .context("Failed to persist credential")
    }

    /// Forget the credential, the default header and the user's cached progress.
    /// Memory is cleared first so a storage failure never leaves a live token.
    pub fn clear(&self) -> Result<()> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let previous = current.take();
        self.set_auth_header(None);

        let user_id = match previous {
            Some(credential) => Some(credential.user.id),
            None => self.stored_user_id(),
        };

        self.storage
            .remove_many(&[TOKEN_KEY, EXPIRES_AT_KEY, USER_KEY])
            .context("Failed to remove stored credential")?;
        if let Some(user_id) = user_id {
            self.storage
                .remove_prefix(&progress_prefix(user_id))
                .context("Failed to remove cached progress")?;
        }
        Ok(())
    }

    fn stored_user_id(&self) -> Option<i64> {
        match self.storage.get(USER_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<User>(&raw).ok().map(|u| u.id),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                None
            }
        }
    }

    /// Configure the default bearer token for calls that don't pass one
    pub fn set_auth_header(&self, token: Option<&str>) {
        *self.auth_header.write().unwrap_or_else(|e| e.into_inner()) = token.map(str::to_string);
    }

    pub fn auth_header(&self) -> Option<String> {
        self.auth_header
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.user.clone())
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.storage)
    }
}
