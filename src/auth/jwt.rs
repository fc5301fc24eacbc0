//! Unverified JWT payload inspection
//!
//! The backend verifies signatures; the client only peeks at claims to
//! derive the `X-User-Id` header and show expiry in `status`.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Decode the payload (second segment) of a JWT.
pub fn claims(token: &str) -> Result<Value> {
    let payload = match token.split('.').nth(1) {
        Some(p) if !p.is_empty() => p,
        _ => bail!("token has no payload segment"),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("payload is not base64url")?;
    serde_json::from_slice(&bytes).context("payload is not JSON")
}

/// First non-empty of `userId`, `sub`, `id`.
pub fn user_id(token: &str) -> Result<Option<String>> {
    let claims = claims(token)?;
    let id = ["userId", "sub", "id"]
        .iter()
        .filter_map(|field| match claims.get(*field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        })
        .next();
    Ok(id)
}

/// `exp` claim as seconds since the epoch.
pub fn expires_at(token: &str) -> Option<i64> {
    claims(token).ok()?.get("exp")?.as_i64()
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.signature",
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}
