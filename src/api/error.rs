//! Error taxonomy for backend calls

use serde_json::Value;

/// Normalized failure of a backend call.
///
/// Cloneable so a single outcome can be handed to every caller that shared
/// one in-flight refresh or coalesced load.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// No response was received (connection refused, DNS, cancelled).
    #[error("Unable to connect to the server: {message}")]
    Network { message: String },

    /// The transport deadline elapsed before a response arrived.
    #[error("Request timeout. Please check your internet connection and try again.")]
    Timeout,

    /// The session could not be renewed; the user has to log in again.
    #[error("Session expired. Please log in again.")]
    SessionExpired,

    /// 401 on a request that is not eligible for a refresh.
    #[error("{message}")]
    Unauthorized { message: String },

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("An internal server error occurred. Please try again later.")]
    Server { status: u16, code: Option<String> },

    /// Any other non-2xx status, with the backend message when it sent one.
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Rejected client-side before anything was sent.
    #[error("{0}")]
    Invalid(String),
}

/// Fields picked out of a backend error body. Read loosely: some
/// controllers send a numeric `code` or a non-string `message`.
#[derive(Debug, Default)]
struct BackendError {
    message: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

impl BackendError {
    fn parse(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let text = |field: &str| match value.get(field)? {
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        let code = match value.get("code") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            message: text("message"),
            error: text("error"),
            code,
        }
    }

    fn message(&self) -> Option<String> {
        [&self.message, &self.error]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
            .cloned()
    }
}

impl ApiError {
    /// Map a non-2xx status plus response body onto the taxonomy.
    ///
    /// 401 maps to `Unauthorized` here; the client decides separately
    /// whether that status is recoverable through a refresh.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let backend = BackendError::parse(body);
        match status {
            401 => ApiError::Unauthorized {
                message: backend
                    .message()
                    .unwrap_or_else(|| "Your session has expired. Please log in again.".into()),
            },
            403 => ApiError::Forbidden,
            s if s >= 500 => ApiError::Server {
                status: s,
                code: backend.code,
            },
            s => ApiError::Status {
                status: s,
                message: backend.message().unwrap_or_else(|| default_message(s)),
                code: backend.code,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Timeout => Some(408),
            ApiError::SessionExpired | ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden => Some(403),
            ApiError::Server { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::Network { .. } | ApiError::Decode(_) | ApiError::Invalid(_) => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Network { .. } => Some("NETWORK_ERROR"),
            ApiError::Timeout => Some("REQUEST_TIMEOUT"),
            ApiError::SessionExpired => Some("SESSION_EXPIRED"),
            ApiError::Unauthorized { .. } => Some("UNAUTHORIZED"),
            ApiError::Forbidden => Some("FORBIDDEN"),
            ApiError::Server { code, .. } => code.as_deref().or(Some("SERVER_ERROR")),
            ApiError::Status { code, .. } => code.as_deref(),
            ApiError::Decode(_) => Some("DECODE_ERROR"),
            ApiError::Invalid(_) => Some("INVALID_REQUEST"),
        }
    }

    /// True for 401/403 outcomes; callers must not hide these behind defaults.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ApiError::SessionExpired | ApiError::Unauthorized { .. } | ApiError::Forbidden
        )
    }
}

fn default_message(status: u16) -> String {
    match status {
        404 => "The requested resource was not found.".into(),
        s => format!("Request failed with status {}", s),
    }
}
