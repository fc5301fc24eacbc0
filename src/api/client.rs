//! Authenticated HTTP client for the expense backend
//!
//! Wraps a [`Transport`] with token injection, tenant scoping, error
//! normalization and a single-flight token refresh.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Deserialize;
use url::Url;

use super::error::ApiError;
use super::request::{ApiResponse, OutboundRequest, RequestBody, RequestFlags};
use super::transport::{Transport, TransportError, TransportRequest};
use crate::auth::{jwt, Credential, SessionContext};

pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// Login, refresh and logout live under here and are never refreshed or logged.
fn is_auth_path(path: &str) -> bool {
    path.contains("/auth/")
}

fn is_unauthenticated_path(path: &str) -> bool {
    is_auth_path(path) || path.starts_with("/public/")
}

/// Company administration endpoints list or manage tenants themselves.
fn is_tenant_admin_path(path: &str) -> bool {
    path.contains("/companies")
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<(), ApiError>>>;

/// At most one refresh exchange in flight; `generation` tells a settling
/// refresh whether the slot still holds it.
#[derive(Default)]
struct RefreshSlot {
    generation: u64,
    pending: Option<RefreshFuture>,
}

fn cancelled() -> ApiError {
    ApiError::Network {
        message: "request cancelled".into(),
    }
}

/// Builds headers, calls the transport and classifies the outcome.
/// Never refreshes, so the refresh exchange itself goes through here.
#[derive(Clone)]
struct Dispatcher {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    base_url: Url,
    network_logs: bool,
}

impl Dispatcher {
    async fn dispatch(&self, req: &OutboundRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(req)?;
        let headers = self.headers_for(req);

        if self.network_logs && !is_auth_path(&req.path) {
            tracing::debug!("Request: {} {}", req.method.as_str(), url);
        }

        let resp = self
            .transport
            .request(TransportRequest {
                method: req.method,
                url: url.to_string(),
                headers,
                body: req.body.clone(),
                signal: req.signal.clone(),
            })
            .await
            .map_err(|e| match e {
                TransportError::Timeout => ApiError::Timeout,
                TransportError::Cancelled => cancelled(),
                TransportError::Connect(message) => ApiError::Network { message },
            })?;

        if self.network_logs && !is_auth_path(&req.path) {
            tracing::debug!("Response: {} {} {}", resp.status, req.method.as_str(), req.path);
        }

        if (200..300).contains(&resp.status) {
            Ok(ApiResponse {
                status: resp.status,
                headers: resp.headers,
                body: resp.body,
            })
        } else {
            Err(ApiError::from_status(resp.status, &resp.body))
        }
    }

    fn url_for(&self, req: &OutboundRequest) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join(&req.path)
            .map_err(|e| ApiError::Invalid(format!("invalid path {}: {}", req.path, e)))?;
        if !req.query.is_empty() {
            url.query_pairs_mut().extend_pairs(req.query.iter());
        }
        Ok(url)
    }

    fn headers_for(&self, req: &OutboundRequest) -> Vec<(String, String)> {
        let multipart = matches!(req.body, Some(RequestBody::Multipart(_)));

        let mut headers: Vec<(String, String)> = req
            .headers
            .iter()
            .filter(|(k, _)| !(multipart && k.eq_ignore_ascii_case("Content-Type")))
            .cloned()
            .collect();
        if !req.has_header("Accept") {
            headers.push(("Accept".into(), "application/json".into()));
        }
        if matches!(req.body, Some(RequestBody::Json(_))) && !req.has_header("Content-Type") {
            headers.push(("Content-Type".into(), "application/json".into()));
        }

        if !req.flags.skip_auth && !is_unauthenticated_path(&req.path) {
            match self.session.tokens().access_token() {
                Some(token) => {
                    match jwt::user_id(&token) {
                        Ok(Some(id)) => set_header(&mut headers, "X-User-Id", id),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Failed to extract user id from token: {:#}", e),
                    }
                    set_header(&mut headers, "Authorization", format!("Bearer {}", token));
                }
                None => {
                    tracing::warn!(
                        "No auth token found, {} {} will be unauthenticated",
                        req.method.as_str(),
                        req.path
                    );
                }
            }
        }

        if !req.flags.skip_tenant_scope && !is_tenant_admin_path(&req.path) {
            if let Some(company) = self.session.tenant().active() {
                set_header(&mut headers, "X-Company-Id", company.to_string());
            }
        }

        headers
    }

    /// Exchange the stored refresh token for a new credential.
    ///
    /// Any failure wipes the session and reports `SessionExpired`.
    async fn renew_session(&self) -> Result<(), ApiError> {
        let Some(refresh_token) = self.session.tokens().refresh_token() else {
            tracing::warn!("No refresh token stored, cannot renew session");
            self.session.expire();
            return Err(ApiError::SessionExpired);
        };

        tracing::info!("Access token rejected, refreshing session...");
        let req = OutboundRequest::post(REFRESH_PATH)
            .json(serde_json::json!({ "refreshToken": refresh_token }))
            .flags(RequestFlags {
                skip_auth: true,
                skip_tenant_scope: true,
                skip_retry_on_auth_failure: true,
                ..RequestFlags::default()
            });

        let renewed = self
            .dispatch(&req)
            .await
            .and_then(|resp| resp.json::<RefreshResponse>());

        match renewed {
            Ok(RefreshResponse {
                access_token: Some(access),
                refresh_token: rotated,
            }) if !access.is_empty() => {
                let refresh = rotated.filter(|rt| !rt.is_empty()).or(Some(refresh_token));
                self.session
                    .tokens()
                    .replace(Credential::new(access, refresh));
                tracing::info!("Token refresh successful");
                Ok(())
            }
            Ok(_) => {
                tracing::error!("Token refresh failed: no accessToken in refresh response");
                self.session.expire();
                Err(ApiError::SessionExpired)
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                self.session.expire();
                Err(ApiError::SessionExpired)
            }
        }
    }

    fn log_failure(&self, req: &OutboundRequest, err: &ApiError) {
        if is_auth_path(&req.path) || req.flags.suppress_error_log {
            return;
        }
        tracing::error!(
            method = req.method.as_str(),
            path = %req.path,
            status = ?err.status(),
            code = ?err.code(),
            "Request failed: {}",
            err
        );
    }
}

/// Authenticated client shared by all services. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Dispatcher,
    refresh: Arc<Mutex<RefreshSlot>>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionContext>,
        base_url: &str,
    ) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API base URL {}", base_url))?;
        Ok(Self {
            dispatcher: Dispatcher {
                transport,
                session,
                base_url,
                network_logs: false,
            },
            refresh: Arc::new(Mutex::new(RefreshSlot::default())),
        })
    }

    /// Log every request/response line at debug level.
    pub fn with_network_logs(mut self, enabled: bool) -> Self {
        self.dispatcher.network_logs = enabled;
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.dispatcher.session
    }

    pub fn base_url(&self) -> &Url {
        &self.dispatcher.base_url
    }

    /// Send a request; a 401 triggers one shared refresh and a single replay.
    pub async fn send(&self, req: &OutboundRequest) -> Result<ApiResponse, ApiError> {
        let result = match self.dispatcher.dispatch(req).await {
            // A caller that gave up never starts a refresh.
            Err(ApiError::Unauthorized { .. }) if req.is_cancelled() => Err(cancelled()),
            Err(ApiError::Unauthorized { .. }) if Self::may_refresh(req) => {
                match self.refresh_session().await {
                    // The replay carries the retry marker, so a second 401 stays a 401.
                    Ok(()) => self.dispatcher.dispatch(&req.for_retry()).await,
                    Err(e) => Err(e),
                }
            }
            other => other,
        };

        if let Err(err) = &result {
            self.dispatcher.log_failure(req, err);
        }
        result
    }

    fn may_refresh(req: &OutboundRequest) -> bool {
        !req.flags.skip_retry_on_auth_failure && !req.flags.retry && !is_auth_path(&req.path)
    }

    /// Join the in-flight refresh, or start one if none is pending.
    pub async fn refresh_session(&self) -> Result<(), ApiError> {
        let pending = {
            let mut slot = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
            match &slot.pending {
                Some(pending) => {
                    tracing::debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    slot.generation += 1;
                    let pending = self.start_refresh(slot.generation);
                    slot.pending = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn start_refresh(&self, generation: u64) -> RefreshFuture {
        let dispatcher = self.dispatcher.clone();
        let slot = Arc::clone(&self.refresh);
        async move {
            let outcome = dispatcher.renew_session().await;
            {
                let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
                if slot.generation == generation {
                    slot.pending = None;
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::FormPart;
    use crate::api::testing::{json_body, json_response, path_of, MockTransport};
    use crate::auth::jwt::encode_test_token;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;

    const BASE: &str = "http://backend.test";

    fn session_with(access: Option<&str>, refresh: Option<&str>) -> Arc<SessionContext> {
        let session = SessionContext::in_memory();
        if let Some(access) = access {
            session.establish(Credential::new(access, refresh.map(String::from)));
        }
        Arc::new(session)
    }

    fn counting_session(
        access: &str,
        refresh: Option<&str>,
    ) -> (Arc<SessionContext>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let session = SessionContext::in_memory().on_session_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.establish(Credential::new(access, refresh.map(String::from)));
        (Arc::new(session), fired)
    }

    /// Backend that accepts only `Bearer fresh` and renews `good-refresh`.
    fn expiring_backend() -> MockTransport {
        MockTransport::new(|req| {
            if path_of(req) == REFRESH_PATH {
                let body = json_body(req).unwrap_or_default();
                return if body["refreshToken"] == "good-refresh" {
                    json_response(200, json!({"accessToken": "fresh", "refreshToken": "rotated"}))
                } else {
                    json_response(401, json!({"message": "invalid refresh token"}))
                };
            }
            match req.header("Authorization") {
                Some("Bearer fresh") => json_response(200, json!([{"id": 1, "amount": 10}])),
                _ => json_response(401, json!({"message": "token expired"})),
            }
        })
        .with_latency(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_company_header_scoping() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!([]))));
        let session = session_with(Some("token"), None);
        session.tenant().set(Some(5));
        let client = ApiClient::new(transport.clone(), session, BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert_ok!(client.send(&OutboundRequest::get("/api/v1/companies")).await);
        assert_ok!(
            client
                .send(&OutboundRequest::get("/api/v1/expenses").skip_tenant_scope(true))
                .await
        );

        let calls = transport.calls();
        assert_eq!(calls[0].header("X-Company-Id"), Some("5"));
        assert_eq!(calls[1].header("X-Company-Id"), None);
        assert_eq!(calls[2].header("X-Company-Id"), None);
    }

    #[tokio::test]
    async fn test_personal_scope_sends_no_company() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!([]))));
        let session = session_with(Some("token"), None);
        session.tenant().set(Some(0));
        let client = ApiClient::new(transport.clone(), session, BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert_eq!(transport.calls()[0].header("X-Company-Id"), None);
    }

    #[tokio::test]
    async fn test_bearer_and_user_id_headers() {
        let token = encode_test_token(&json!({"sub": "42"}));
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let client =
            ApiClient::new(transport.clone(), session_with(Some(token.as_str()), None), BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::get("/api/v1/bills")).await);
        let call = &transport.calls()[0];
        assert_eq!(
            call.header("Authorization"),
            Some(format!("Bearer {}", token).as_str())
        );
        assert_eq!(call.header("X-User-Id"), Some("42"));
        assert_eq!(call.header("Accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_opaque_token_omits_user_id() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let client =
            ApiClient::new(transport.clone(), session_with(Some("opaque"), None), BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::get("/api/v1/bills")).await);
        let call = &transport.calls()[0];
        assert_eq!(call.header("Authorization"), Some("Bearer opaque"));
        assert_eq!(call.header("X-User-Id"), None);
    }

    #[tokio::test]
    async fn test_missing_token_sends_unauthenticated() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!([]))));
        let client = ApiClient::new(transport.clone(), session_with(None, None), BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert_eq!(transport.calls()[0].header("Authorization"), None);
    }

    #[tokio::test]
    async fn test_auth_and_public_paths_skip_bearer() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let client =
            ApiClient::new(transport.clone(), session_with(Some("token"), None), BASE).unwrap();

        assert_ok!(client.send(&OutboundRequest::post("/api/v1/auth/login")).await);
        assert_ok!(client.send(&OutboundRequest::get("/public/health")).await);
        assert!(transport
            .calls()
            .iter()
            .all(|c| c.header("Authorization").is_none()));
    }

    #[tokio::test]
    async fn test_content_type_and_query() {
        let transport = Arc::new(MockTransport::new(|_| json_response(200, json!({}))));
        let client =
            ApiClient::new(transport.clone(), session_with(Some("token"), None), BASE).unwrap();

        let json_req = OutboundRequest::post("/api/v1/expenses")
            .json(json!({"amount": 1}))
            .query("companyId", 3);
        let form_req = OutboundRequest::post("/api/v1/bills")
            .header("Content-Type", "multipart/form-data")
            .multipart(vec![FormPart::text("merchant", "Cafe")]);
        assert_ok!(client.send(&json_req).await);
        assert_ok!(client.send(&form_req).await);

        let calls = transport.calls();
        assert_eq!(calls[0].header("Content-Type"), Some("application/json"));
        assert_eq!(calls[0].url, "http://backend.test/api/v1/expenses?companyId=3");
        assert_eq!(calls[1].header("Content-Type"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_refreshed_and_retried() {
        let transport = Arc::new(expiring_backend());
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let resp = assert_ok!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert_eq!(resp.value().unwrap(), json!([{"id": 1, "amount": 10}]));

        assert_eq!(session.tokens().access_token().as_deref(), Some("fresh"));
        assert_eq!(session.tokens().refresh_token().as_deref(), Some("rotated"));
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);

        let refresh_call = transport
            .calls()
            .into_iter()
            .find(|c| path_of(c) == REFRESH_PATH)
            .unwrap();
        assert_eq!(refresh_call.header("Authorization"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = Arc::new(expiring_backend());
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session, BASE).unwrap();

        let req = OutboundRequest::get("/api/v1/expenses");
        let results = join_all((0..4).map(|_| client.send(&req))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(transport.calls_to("/api/v1/expenses"), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_happens_only_once() {
        let transport = Arc::new(
            MockTransport::new(|req| {
                if path_of(req) == REFRESH_PATH {
                    json_response(200, json!({"accessToken": "fresh"}))
                } else {
                    json_response(401, json!({}))
                }
            })
            .with_latency(Duration::from_millis(5)),
        );
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let err = assert_err!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert!(matches!(err, ApiError::Unauthorized { .. }));
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(transport.calls_to("/api/v1/expenses"), 2);
        // Refresh kept the old refresh token since none was rotated.
        assert_eq!(
            session.tokens().refresh_token().as_deref(),
            Some("good-refresh")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_expires_session_once() {
        let transport = Arc::new(expiring_backend());
        let (session, fired) = counting_session("stale", Some("revoked"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let req = OutboundRequest::get("/api/v1/expenses");
        let results = join_all((0..3).map(|_| client.send(&req))).await;

        for result in results {
            assert_eq!(result.unwrap_err(), ApiError::SessionExpired);
        }
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert!(session.tokens().credential().is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_refresh_token_expires_session_once() {
        let transport = Arc::new(expiring_backend());
        let (session, fired) = counting_session("stale", None);
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let req = OutboundRequest::get("/api/v1/expenses");
        let results = join_all((0..3).map(|_| client.send(&req))).await;

        assert!(results
            .iter()
            .all(|r| r.as_ref().unwrap_err() == &ApiError::SessionExpired));
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
        assert!(!session.tokens().is_authenticated());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_access_token_fails() {
        let transport = Arc::new(MockTransport::new(|req| {
            if path_of(req) == REFRESH_PATH {
                json_response(200, json!({"refreshToken": "only-refresh"}))
            } else {
                json_response(401, json!({}))
            }
        }));
        let (session, fired) = counting_session("stale", Some("good-refresh"));
        let client = ApiClient::new(transport, session.clone(), BASE).unwrap();

        let err = assert_err!(client.send(&OutboundRequest::get("/api/v1/expenses")).await);
        assert_eq!(err, ApiError::SessionExpired);
        assert!(!session.tokens().is_authenticated());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exempt_401s_are_not_refreshed() {
        let transport = Arc::new(MockTransport::new(|_| json_response(401, json!({}))));
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session, BASE).unwrap();

        let skip = OutboundRequest::get("/api/v1/expenses").flags(RequestFlags {
            skip_retry_on_auth_failure: true,
            ..RequestFlags::default()
        });
        let login = OutboundRequest::post("/api/v1/auth/login");
        assert!(matches!(
            client.send(&skip).await,
            Err(ApiError::Unauthorized { .. })
        ));
        assert!(matches!(
            client.send(&login).await,
            Err(ApiError::Unauthorized { .. })
        ));
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_status_normalization() {
        let transport = Arc::new(MockTransport::new(|req| match path_of(req).as_str() {
            "/forbidden" => json_response(403, json!({})),
            "/broken" => json_response(502, json!({})),
            "/missing" => json_response(404, json!({"message": "Expense not found", "code": "NOT_FOUND"})),
            "/moved" => json_response(302, json!({})),
            _ => json_response(200, json!({})),
        }));
        let client =
            ApiClient::new(transport.clone(), session_with(Some("t"), Some("r")), BASE).unwrap();

        let send = |path: &'static str| client.send_path(path);
        assert_eq!(send("/forbidden").await.unwrap_err(), ApiError::Forbidden);
        assert_eq!(
            send("/broken").await.unwrap_err(),
            ApiError::Server {
                status: 502,
                code: None
            }
        );
        assert_eq!(
            send("/missing").await.unwrap_err(),
            ApiError::Status {
                status: 404,
                message: "Expense not found".into(),
                code: Some("NOT_FOUND".into()),
            }
        );
        assert_eq!(send("/moved").await.unwrap_err().status(), Some(302));
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let transport = Arc::new(MockTransport::new(|req| match path_of(req).as_str() {
            "/slow" => Err(TransportError::Timeout),
            "/cancelled" => Err(TransportError::Cancelled),
            _ => Err(TransportError::Connect("connection refused".into())),
        }));
        let client = ApiClient::new(transport.clone(), session_with(None, None), BASE).unwrap();

        assert_eq!(client.send_path("/slow").await.unwrap_err(), ApiError::Timeout);
        assert!(matches!(
            client.send_path("/cancelled").await,
            Err(ApiError::Network { .. })
        ));
        assert_eq!(
            client.send_path("/down").await.unwrap_err(),
            ApiError::Network {
                message: "connection refused".into()
            }
        );
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_is_network_error_without_refresh() {
        let transport = Arc::new(expiring_backend());
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let signal = CancellationToken::new();
        let req = OutboundRequest::get("/api/v1/expenses").with_signal(signal.clone());
        let (result, ()) = tokio::join!(client.send(&req), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            signal.cancel();
        });

        assert_eq!(assert_err!(result), cancelled());
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
        assert_eq!(session.tokens().access_token().as_deref(), Some("stale"));

        // Already cancelled before it is sent.
        let err = assert_err!(client.send(&req).await);
        assert!(matches!(err, ApiError::Network { .. }));
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_401_after_cancel_does_not_refresh() {
        let signal = CancellationToken::new();
        let cancel = signal.clone();
        let transport = Arc::new(MockTransport::new(move |req| {
            if path_of(req) == REFRESH_PATH {
                return json_response(200, json!({"accessToken": "fresh"}));
            }
            cancel.cancel();
            json_response(401, json!({"message": "token expired"}))
        }));
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session, BASE).unwrap();

        let req = OutboundRequest::get("/api/v1/expenses").with_signal(signal);
        assert_eq!(assert_err!(client.send(&req).await), cancelled());
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_refresh_skips_replay() {
        let transport = Arc::new(expiring_backend());
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();

        let signal = CancellationToken::new();
        let req = OutboundRequest::get("/api/v1/expenses").with_signal(signal.clone());
        let (result, ()) = tokio::join!(client.send(&req), async {
            // First answer lands at 10ms, the refresh at 20ms.
            tokio::time::sleep(Duration::from_millis(15)).await;
            signal.cancel();
        });

        assert_eq!(assert_err!(result), cancelled());
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        // The refresh itself still lands for everyone else.
        assert_eq!(session.tokens().access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_401_episode_starts_its_own_refresh() {
        let valid: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let issued = Arc::new(AtomicUsize::new(0));
        let transport = {
            let valid = valid.clone();
            Arc::new(
                MockTransport::new(move |req| {
                    let mut current = valid.lock().unwrap();
                    if path_of(req) == REFRESH_PATH {
                        let token = format!("t{}", issued.fetch_add(1, Ordering::SeqCst) + 1);
                        *current = Some(token.clone());
                        return json_response(200, json!({"accessToken": token}));
                    }
                    let expected = current.as_ref().map(|token| format!("Bearer {}", token));
                    if expected.is_some() && req.header("Authorization") == expected.as_deref() {
                        json_response(200, json!([]))
                    } else {
                        json_response(401, json!({"message": "token expired"}))
                    }
                })
                .with_latency(Duration::from_millis(10)),
            )
        };
        let session = session_with(Some("stale"), Some("good-refresh"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();
        let req = OutboundRequest::get("/api/v1/expenses");

        let first = join_all((0..3).map(|_| client.send(&req))).await;
        assert!(first.iter().all(Result::is_ok));
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        assert_eq!(session.tokens().access_token().as_deref(), Some("t1"));

        // Server side expiry of t1.
        *valid.lock().unwrap() = None;

        let second = join_all((0..3).map(|_| client.send(&req))).await;
        assert!(second.iter().all(Result::is_ok));
        assert_eq!(transport.calls_to(REFRESH_PATH), 2);
        assert_eq!(session.tokens().access_token().as_deref(), Some("t2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_after_failed_refresh_rearms_expiry() {
        let transport = Arc::new(expiring_backend());
        let (session, fired) = counting_session("stale", Some("revoked"));
        let client = ApiClient::new(transport.clone(), session.clone(), BASE).unwrap();
        let req = OutboundRequest::get("/api/v1/expenses");

        assert_eq!(assert_err!(client.send(&req).await), ApiError::SessionExpired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);

        session.establish(Credential::new("stale-again", Some("revoked".into())));
        assert_eq!(assert_err!(client.send(&req).await), ApiError::SessionExpired);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls_to(REFRESH_PATH), 2);

        session.establish(Credential::new("stale", Some("good-refresh".into())));
        assert_ok!(client.send(&req).await);
        assert_eq!(transport.calls_to(REFRESH_PATH), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    impl ApiClient {
        async fn send_path(&self, path: &str) -> Result<ApiResponse, ApiError> {
            self.send(&OutboundRequest::get(path)).await
        }
    }
}
