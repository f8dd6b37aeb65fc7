//! Translation of internal errors into HTTP responses.
//!
//! Every failure leaving a handler becomes a JSON body with a stable shape,
//! so clients and the reload overlay can render it without sniffing. The
//! status code mapping mirrors the error taxonomy: transient filesystem
//! pressure invites a retry, everything else is final for that request.

use std::io;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use kiln_core::Error;
use serde::Serialize;

/// JSON payload returned for every failed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Maps an internal error onto a status code and JSON body.
pub fn error_response(error: &Error, request_id: Option<String>) -> Response {
    let status = status_for(error);
    let body = ErrorBody {
        message: error.to_string(),
        stack: source_chain(error),
        request_id,
    };
    with_retry_hint(status, (status, Json(body)).into_response())
}

/// Builds an error response without an underlying `Error`, for conditions
/// the handlers diagnose themselves (missing assets, traversal attempts).
pub fn plain_error(
    status: StatusCode,
    message: impl Into<String>,
    request_id: Option<String>,
) -> Response {
    let body = ErrorBody {
        message: message.into(),
        stack: None,
        request_id,
    };
    with_retry_hint(status, (status, Json(body)).into_response())
}

fn with_retry_hint(status: StatusCode, mut response: Response) -> Response {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    }
    response
}

fn status_for(error: &Error) -> StatusCode {
    if error.is_retryable() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match error {
        Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        Error::PermissionDenied { .. } => StatusCode::FORBIDDEN,
        Error::FileSystem { source, .. } => match source.kind() {
            io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn source_chain(error: &Error) -> Option<String> {
    let mut chain = Vec::new();
    let mut current = std::error::Error::source(error);
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    if chain.is_empty() {
        None
    } else {
        Some(chain.join("\ncaused by: "))
    }
}
