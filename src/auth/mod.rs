//! Authentication module
//!
//! Credentials are a backend-issued access/refresh token pair. The access
//! token is a JWT whose claims are only inspected, never verified, here.

pub mod jwt;
pub mod login;
pub mod session;
pub mod tokens;

pub use login::{login, logout, status, AuthStatus, TokenResponse};
pub use session::{SessionContext, TenantScope};
pub use tokens::{Credential, MemorySecretStore, SecretStore, TokenStore};
