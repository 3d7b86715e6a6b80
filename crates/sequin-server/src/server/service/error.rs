//! HTTP error mapping.
//!
//! Every failure leaves the server as a JSON body `{ "code", "message" }` with
//! a status code derived from the library error:
//!
//! | Error                | Status | Code                 |
//! |----------------------|--------|----------------------|
//! | `InvalidArgument`    | 400    | `INVALID_ARGUMENT`   |
//! | `NotFound`           | 404    | `NOT_FOUND`          |
//! | `ResourceExhausted`  | 429    | `RESOURCE_EXHAUSTED` |
//! | `Unavailable`        | 503    | `UNAVAILABLE`        |
//! | `CounterOverflow`    | 500    | `COUNTER_OVERFLOW`   |

use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Failure reported by the allocation service.
    #[error(transparent)]
    Service(#[from] sequin::Error),

    /// The request body or query string could not be decoded.
    #[error("Invalid argument: {reason}")]
    InvalidRequest { reason: String },
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            Self::Service(err) => match err {
                sequin::Error::InvalidArgument { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
                }
                sequin::Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                sequin::Error::ResourceExhausted { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "RESOURCE_EXHAUSTED")
                }
                sequin::Error::Unavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
                }
                sequin::Error::CounterOverflow { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "COUNTER_OVERFLOW")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest {
            reason: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let message = self.to_string();

        #[cfg(feature = "tracing")]
        {
            if status.is_server_error() {
                tracing::error!(code, %message, "request failed");
            } else {
                tracing::debug!(code, %message, "request rejected");
            }
        }

        (status, Json(ErrorBody { code, message })).into_response()
    }
}
