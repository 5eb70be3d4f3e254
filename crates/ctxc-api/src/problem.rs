//! RFC 7807 problem responses.
//!
//! Every error leaving the HTTP surface is an `application/problem+json`
//! document with a stable machine-readable `type` URN and a human `detail`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ctxc_core::Error;

/// RFC 7807 body.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Error wrapper implementing `IntoResponse`.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match &error {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Load { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Config(_)
            | Error::Database(_)
            | Error::Io(_)
            | Error::Embed(_)
            | Error::Index(_)
            | Error::Job(_)
            | Error::Serialization(_)
            | Error::Request(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = match &error {
            // Validation details are already user-facing.
            Error::Validation { detail, .. } => detail.clone(),
            other => other.to_string(),
        };

        let body = Problem {
            type_uri: format!("urn:ctxc:error:{}", error.kind()),
            title: title_for(&error).to_string(),
            status: status.as_u16(),
            detail,
            instance: None,
        };
        (status, Json(body)).into_response()
    }
}

fn title_for(error: &Error) -> &'static str {
    match error {
        Error::NotFound(_) => "Not Found",
        Error::Validation { .. } => "Validation Error",
        Error::DeadlineExceeded => "Deadline Exceeded",
        Error::Cancelled(_) => "Cancelled",
        Error::Load { .. } => "Load Error",
        Error::Config(_) => "Configuration Error",
        _ => "Internal Error",
    }
}
