//! Password login, logout and local session status

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use super::tokens::Credential;
use super::{jwt, SessionContext};
use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::request::OutboundRequest;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const LOGOUT_PATH: &str = "/api/v1/auth/logout";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in_seconds: Option<u64>,
}

/// Exchange email and password for a credential and store it.
pub async fn login(client: &ApiClient, email: &str, password: &str) -> Result<TokenResponse, ApiError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(ApiError::Invalid("Email and password are required".into()));
    }

    let req = OutboundRequest::post(LOGIN_PATH)
        .json(json!({ "email": email, "password": password }))
        .skip_tenant_scope(true);
    let tokens: TokenResponse = client.send(&req).await?.json()?;
    if tokens.access_token.is_empty() {
        return Err(ApiError::Decode("login response has no accessToken".into()));
    }

    client.session().establish(Credential::new(
        tokens.access_token.clone(),
        tokens.refresh_token.clone().filter(|t| !t.is_empty()),
    ));
    tracing::info!("Logged in as {}", email);
    Ok(tokens)
}

/// Revoke the refresh token server-side if possible, then forget the
/// credential locally. Local logout always succeeds.
pub async fn logout(client: &ApiClient) {
    if let Some(refresh) = client.session().tokens().refresh_token() {
        let req = OutboundRequest::post(LOGOUT_PATH)
            .json(json!({ "refreshToken": refresh }))
            .skip_tenant_scope(true)
            .suppress_error_log();
        if let Err(e) = client.send(&req).await {
            tracing::warn!("Server-side logout failed: {}", e);
        }
    }
    client.session().tokens().clear();
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub has_refresh_token: bool,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub company_id: Option<i64>,
}

impl AuthStatus {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }
}

pub fn status(session: &SessionContext) -> AuthStatus {
    let credential = session.tokens().credential();
    let access = credential.as_ref().map(|c| c.access_token.as_str());

    AuthStatus {
        authenticated: credential.is_some(),
        has_refresh_token: credential
            .as_ref()
            .is_some_and(|c| c.refresh_token.is_some()),
        user_id: access.and_then(|t| jwt::user_id(t).ok().flatten()),
        expires_at: access
            .and_then(jwt::expires_at)
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
        company_id: session.tenant().active(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{json_body, json_response, path_of, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn client_with(transport: Arc<MockTransport>, session: SessionContext) -> ApiClient {
        ApiClient::new(transport, Arc::new(session), "http://backend.test").unwrap()
    }

    #[tokio::test]
    async fn test_login_stores_credential_and_rearms_hook() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let session = SessionContext::in_memory().on_session_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.expire();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let transport = Arc::new(MockTransport::new(|_| {
            json_response(
                200,
                json!({
                    "accessToken": "new-access",
                    "refreshToken": "new-refresh",
                    "tokenType": "Bearer",
                    "expiresInSeconds": 900
                }),
            )
        }));
        let client = client_with(transport.clone(), session);

        let tokens = assert_ok!(login(&client, " user@example.com ", "secret").await);
        assert_eq!(tokens.expires_in_seconds, Some(900));
        assert_eq!(
            client.session().tokens().refresh_token().as_deref(),
            Some("new-refresh")
        );

        let call = &transport.calls()[0];
        assert_eq!(path_of(call), LOGIN_PATH);
        assert_eq!(call.header("Authorization"), None);
        assert_eq!(
            json_body(call).unwrap(),
            json!({"email": "user@example.com", "password": "secret"})
        );

        client.session().expire();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_password_is_not_refreshed() {
        let transport = Arc::new(MockTransport::new(|_| {
            json_response(401, json!({"message": "Invalid credentials"}))
        }));
        let client = client_with(transport.clone(), SessionContext::in_memory());

        let err = assert_err!(login(&client, "user@example.com", "wrong").await);
        assert_eq!(
            err,
            ApiError::Unauthorized {
                message: "Invalid credentials".into()
            }
        );
        assert_eq!(transport.calls().len(), 1);
        assert!(!client.session().tokens().is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let session = SessionContext::in_memory();
        session.establish(Credential::new("access", Some("refresh".into())));
        let transport = Arc::new(MockTransport::new(|_| json_response(500, json!({}))));
        let client = client_with(transport.clone(), session);

        logout(&client).await;

        assert!(!client.session().tokens().is_authenticated());
        let call = &transport.calls()[0];
        assert_eq!(path_of(call), LOGOUT_PATH);
        assert_eq!(json_body(call).unwrap(), json!({"refreshToken": "refresh"}));
    }

    #[test]
    fn test_status_reads_claims() {
        let session = SessionContext::in_memory();
        assert!(!status(&session).authenticated);

        let token = jwt::encode_test_token(&json!({"sub": "42", "exp": 1_700_000_000}));
        session.establish(Credential::new(token, None));
        session.tenant().set(Some(9));

        let status = status(&session);
        assert!(status.authenticated);
        assert!(!status.has_refresh_token);
        assert_eq!(status.user_id.as_deref(), Some("42"));
        assert_eq!(status.expires_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(status.is_expired());
        assert_eq!(status.company_id, Some(9));
    }
}
