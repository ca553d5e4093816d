use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Inbound body is not JSON, missing required fields, or converts to an
    /// empty input list.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unknown client bearer token.
    #[error("Unauthorized")]
    Unauthorized,

    /// No route matches the request.
    #[error("Not found")]
    NotFound,

    /// Required configuration missing or malformed for the selected provider.
    #[error("Server misconfigured: {0}")]
    ServerMisconfigured(String),

    /// All upstream URLs exhausted, an empty event stream confirmed, or the
    /// buffered-response cap exceeded.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Upstream returned a non-retryable error; propagated with its original
    /// status and body.
    #[error("Upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ServerMisconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Upstream { status, .. } => StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
        }
    }

    /// The `code` field of the uniform error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::ServerMisconfigured(_) => "server_error",
            Self::BadGateway(_) | Self::Upstream { .. } => "bad_gateway",
        }
    }
}

/// Uniform error body: `{error: {message, type, code}}`.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: &'static str,
    code: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Upstream bodies pass through verbatim when they are JSON so the
        // client sees the provider's own error shape.
        if let Self::Upstream { body, .. } = &self
            && let Ok(parsed) = serde_json::from_str::<Value>(body)
        {
            return (status, Json(parsed)).into_response();
        }

        let message = match &self {
            Self::Upstream { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: "invalid_request_error",
                code: self.code(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, "Bearer".parse().expect("static header value"));
        }

        response
    }
}
