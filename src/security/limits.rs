//! Request body limits.
//!
//! # Responsibilities
//! - Aggregate the request body up to `max_content_size`
//! - Report oversized bodies as 413 Payload Too Large
//!
//! # Design Decisions
//! - `Content-Length` is checked before reading anything
//! - Chunked bodies are cut off as soon as they pass the limit

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
};
use bytes::Bytes;

/// Why a body could not be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRejection {
    TooLarge,
    /// The client went away or sent a broken body.
    Incomplete,
}

impl BodyRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            BodyRejection::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            BodyRejection::Incomplete => StatusCode::BAD_REQUEST,
        }
    }
}

/// Read the whole body, refusing anything above `limit` bytes.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, BodyRejection> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(BodyRejection::TooLarge);
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        // to_bytes wraps the length-limit error; anything else is a transport fault
        let too_large = std::error::Error::source(&e)
            .is_some_and(|source| source.is::<http_body_util::LengthLimitError>());
        if too_large {
            BodyRejection::TooLarge
        } else {
            tracing::debug!(error = %e, "request body read failed");
            BodyRejection::Incomplete
        }
    })
}
