use actix_web::{error::JsonPayloadError, http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// How a dispatch attempt failed. Drives status mapping after fallback
/// exhaustion, so the original cause is preserved end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchCause {
    Timeout,
    Connection,
    Server,
}

impl DispatchCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchCause::Timeout => "timeout",
            DispatchCause::Connection => "connection",
            DispatchCause::Server => "server",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    NoEngines,
    UnknownStrategy,
    UnknownEngine,
    InvalidRequest,
    RateLimited,
    Forbidden,
    UpstreamTimeout,
    UpstreamConnect,
    UpstreamError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoEngines => "NO_ENGINES",
            ErrorCode::UnknownStrategy => "UNKNOWN_STRATEGY",
            ErrorCode::UnknownEngine => "UNKNOWN_ENGINE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorCode::UpstreamConnect => "UPSTREAM_CONNECT",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NoEngines | ErrorCode::UnknownStrategy => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::UnknownEngine => StatusCode::NOT_FOUND,
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::UpstreamConnect => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UpstreamError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retry_hint_ms(&self) -> u64 {
        match self {
            ErrorCode::UnknownEngine | ErrorCode::InvalidRequest | ErrorCode::Forbidden => 0,
            ErrorCode::RateLimited => 60_000,
            ErrorCode::NoEngines
            | ErrorCode::UnknownStrategy
            | ErrorCode::UpstreamTimeout
            | ErrorCode::UpstreamConnect
            | ErrorCode::UpstreamError
            | ErrorCode::InternalError => 60_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no engines configured")]
    NoEngines,
    #[error("unknown routing strategy: {0}")]
    UnknownStrategy(String),
    #[error("duplicate engine key: {0}")]
    DuplicateEngine(String),
    #[error("engine not configured: {0}")]
    UnknownEngine(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limit exceeded for client {client}")]
    RateLimited { client: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("upstream {engine} failed ({}): {detail}", .cause.as_str())]
    Upstream {
        engine: String,
        fallback_engine: Option<String>,
        cause: DispatchCause,
        detail: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::NoEngines => ErrorCode::NoEngines,
            GatewayError::UnknownStrategy(_) => ErrorCode::UnknownStrategy,
            GatewayError::DuplicateEngine(_) => ErrorCode::InvalidRequest,
            GatewayError::UnknownEngine(_) => ErrorCode::UnknownEngine,
            GatewayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            GatewayError::RateLimited { .. } => ErrorCode::RateLimited,
            GatewayError::Forbidden(_) => ErrorCode::Forbidden,
            GatewayError::Upstream { cause, .. } => match cause {
                DispatchCause::Timeout => ErrorCode::UpstreamTimeout,
                DispatchCause::Connection => ErrorCode::UpstreamConnect,
                DispatchCause::Server => ErrorCode::UpstreamError,
            },
            GatewayError::Io(_) | GatewayError::Any(_) => ErrorCode::InternalError,
        }
    }

    pub fn retry_hint_ms(&self) -> u64 {
        self.code().retry_hint_ms()
    }

    fn engine_attempted(&self) -> Option<&str> {
        match self {
            GatewayError::Upstream { engine, .. } => Some(engine),
            _ => None,
        }
    }

    fn fallback_engine(&self) -> Option<&str> {
        match self {
            GatewayError::Upstream {
                fallback_engine, ..
            } => fallback_engine.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub request_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    inner: GatewayError,
    context: ErrorContext,
}

impl ApiError {
    pub fn new(inner: GatewayError) -> Self {
        Self {
            inner,
            context: ErrorContext::default(),
        }
    }

    pub fn with_request_id(inner: GatewayError, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            context: ErrorContext {
                request_id: Some(request_id.into()),
            },
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(value: GatewayError) -> Self {
        ApiError::new(value)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.inner.code().status()
    }

    fn error_response(&self) -> HttpResponse {
        #[derive(Debug, Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
            request_id: String,
            retry_hint_ms: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            engine: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            fallback_engine: Option<String>,
        }

        let code = self.inner.code();
        let body = ErrorBody {
            code: code.as_str(),
            message: self.inner.to_string(),
            request_id: self
                .context
                .request_id
                .clone()
                .unwrap_or_else(|| "unknown".into()),
            retry_hint_ms: self.inner.retry_hint_ms(),
            engine: self.inner.engine_attempted().map(str::to_string),
            fallback_engine: self.inner.fallback_engine().map(str::to_string),
        };

        let mut response = HttpResponse::build(self.status_code());
        if matches!(code, ErrorCode::RateLimited) {
            response.append_header(("Retry-After", "60"));
        }
        response.json(body)
    }
}

pub fn json_error(err: JsonPayloadError) -> actix_web::Error {
    ApiError::new(GatewayError::InvalidRequest(err.to_string())).into()
}
