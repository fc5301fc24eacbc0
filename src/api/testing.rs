//! Scripted transport for tests

use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::request::RequestBody;
use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};

type Handler =
    dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Records every request and answers through a closure, optionally after a
/// simulated network delay. A cancelled signal wins over the answer.
pub(crate) struct MockTransport {
    handler: Box<Handler>,
    latency: Duration,
    calls: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| path_of(c) == path)
            .count()
    }
}

impl Transport for MockTransport {
    fn request(
        &self,
        req: TransportRequest,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        async move {
            self.calls.lock().unwrap().push(req.clone());
            let latency = self.latency;
            let delay = async move {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
            };
            match req.signal.clone() {
                Some(signal) => tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Err(TransportError::Cancelled),
                    _ = delay => {}
                },
                None => delay.await,
            }
            (self.handler)(&req)
        }
        .boxed()
    }
}

pub(crate) fn json_response(
    status: u16,
    body: Value,
) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        headers: vec![("content-type".into(), "application/json".into())],
        body: body.to_string().into_bytes(),
    })
}

pub(crate) fn path_of(req: &TransportRequest) -> String {
    url::Url::parse(&req.url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

pub(crate) fn query_of(req: &TransportRequest) -> Vec<(String, String)> {
    url::Url::parse(&req.url)
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

pub(crate) fn json_body(req: &TransportRequest) -> Option<Value> {
    match &req.body {
        Some(RequestBody::Json(value)) => Some(value.clone()),
        _ => None,
    }
}
