//! Session context shared by every request: credentials, tenant scope and
//! the login-redirect hook.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use super::tokens::{Credential, SecretStore, TokenStore};

/// Currently selected company. Only a positive id scopes requests.
#[derive(Debug, Default)]
pub struct TenantScope {
    // 0 encodes "personal"
    active: AtomicI64,
}

impl TenantScope {
    pub fn new(id: Option<i64>) -> Self {
        let scope = Self::default();
        scope.set(id);
        scope
    }

    pub fn set(&self, id: Option<i64>) {
        self.active.store(id.unwrap_or(0), Ordering::SeqCst);
    }

    pub fn active(&self) -> Option<i64> {
        Some(self.active.load(Ordering::SeqCst)).filter(|id| *id > 0)
    }
}

type ExpiryHook = Box<dyn Fn() + Send + Sync>;

pub struct SessionContext {
    tokens: TokenStore,
    tenant: TenantScope,
    on_expired: ExpiryHook,
    expired: AtomicBool,
}

impl SessionContext {
    pub fn new(tokens: TokenStore, tenant: TenantScope) -> Self {
        Self {
            tokens,
            tenant,
            on_expired: Box::new(|| {}),
            expired: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(
            TokenStore::load(Arc::new(super::tokens::MemorySecretStore::default())),
            TenantScope::default(),
        )
    }

    pub fn from_store(store: Arc<dyn SecretStore>, company: Option<i64>) -> Self {
        Self::new(TokenStore::load(store), TenantScope::new(company))
    }

    /// Install the "return to login" action.
    pub fn on_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_expired = Box::new(hook);
        self
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn tenant(&self) -> &TenantScope {
        &self.tenant
    }

    /// Store a freshly issued credential and re-arm the expiry hook.
    pub fn establish(&self, credential: Credential) {
        self.tokens.replace(credential);
        self.expired.store(false, Ordering::SeqCst);
    }

    /// Wipe credentials and fire the expiry hook once per episode.
    pub fn expire(&self) {
        self.tokens.clear();
        if !self.expired.swap(true, Ordering::SeqCst) {
            tracing::warn!("Session expired, login required");
            (self.on_expired)();
        }
    }
}
