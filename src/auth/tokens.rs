//! Token storage and management

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Access/refresh token pair. Always replaced as a whole.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// A session restored without one cannot be renewed.
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Key/value secret persistence for different storage backends
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    values: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

/// In-memory view of the current credential, written through to a
/// [`SecretStore`].
///
/// Readers always see either the old or the new pair, never a mix: the
/// credential lives behind one `Arc` that is swapped as a unit.
pub struct TokenStore {
    current: RwLock<Option<Arc<Credential>>>,
    backend: Arc<dyn SecretStore>,
}

impl TokenStore {
    /// Restore whatever the backend holds. Read failures count as absent.
    pub fn load(backend: Arc<dyn SecretStore>) -> Self {
        let read = |key: &str| match backend.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::error!("Failed to read {}: {:#}", key, e);
                None
            }
        };

        let current = match (read(AUTH_TOKEN_KEY), read(REFRESH_TOKEN_KEY)) {
            (Some(access), refresh) => Some(Arc::new(Credential::new(access, refresh))),
            (None, Some(_)) => {
                tracing::warn!("Refresh token stored without access token, ignoring it");
                None
            }
            (None, None) => None,
        };

        Self {
            current: RwLock::new(current),
            backend,
        }
    }

    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.credential().map(|c| c.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.credential().and_then(|c| c.refresh_token.clone())
    }

    /// Swap in a new credential, then persist it best-effort.
    pub fn replace(&self, credential: Credential) {
        let credential = Arc::new(credential);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&credential));

        if let Err(e) = self.backend.set(AUTH_TOKEN_KEY, &credential.access_token) {
            tracing::error!("Failed to save auth token: {:#}", e);
        }
        let refresh = match &credential.refresh_token {
            Some(rt) => self.backend.set(REFRESH_TOKEN_KEY, rt),
            None => self.backend.delete(REFRESH_TOKEN_KEY),
        };
        if let Err(e) = refresh {
            tracing::error!("Failed to save refresh token: {:#}", e);
        }
    }

    /// Drop the credential from memory and from the backend.
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;

        for key in [AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.backend.delete(key) {
                tracing::error!("Failed to clear {}: {:#}", key, e);
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }
}
