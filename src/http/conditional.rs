//! Conditional request evaluation (`If-Match`, `If-None-Match`,
//! `If-Modified-Since`, `If-Range`).
//!
//! # Responsibilities
//! - Compare request validators against an entity tag and last-modified second
//! - Decide whether the entity is served, not modified, or a precondition failed
//!
//! # Design Decisions
//! - Pure and stateless: one call per negotiation, nothing cached
//! - Tags are compared with quotes and the weak `W/` prefix stripped
//! - `If-Modified-Since` is only consulted when `If-None-Match` is absent

use axum::http::{header, HeaderMap, StatusCode};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of evaluating the request's validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Serve the entity (200 or 206).
    Proceed,
    /// 304, no body.
    NotModified,
    /// 412, `If-Match` failed on a plain request.
    PreconditionFailed,
    /// 416, `If-Match` failed on a ranged request.
    RangeNotSatisfiable,
}

impl Precondition {
    /// Status to answer with when the evaluation short-circuits.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Precondition::Proceed => None,
            Precondition::NotModified => Some(StatusCode::NOT_MODIFIED),
            Precondition::PreconditionFailed => Some(StatusCode::PRECONDITION_FAILED),
            Precondition::RangeNotSatisfiable => Some(StatusCode::RANGE_NOT_SATISFIABLE),
        }
    }
}

/// Validators describing the current state of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityValidator {
    /// Unquoted tag, `{size}-{lastModifiedSeconds}`.
    pub etag: String,
    /// Last modification, truncated to whole seconds since the epoch.
    pub last_modified: u64,
}

impl EntityValidator {
    pub fn new(size: u64, modified: SystemTime) -> Self {
        let last_modified = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            etag: format!("{size}-{last_modified}"),
            last_modified,
        }
    }

    /// The tag as sent in the `ETag` header.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// The `Last-Modified` header value.
    pub fn http_date(&self) -> String {
        httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(self.last_modified))
    }

    /// Evaluate `If-Match`, `If-None-Match` and `If-Modified-Since`.
    pub fn evaluate(&self, headers: &HeaderMap) -> Precondition {
        if let Some(if_match) = header_str(headers, header::IF_MATCH) {
            if !tag_list_matches(if_match, &self.etag) {
                return if headers.contains_key(header::RANGE) {
                    Precondition::RangeNotSatisfiable
                } else {
                    Precondition::PreconditionFailed
                };
            }
        }

        match header_str(headers, header::IF_NONE_MATCH) {
            Some(if_none_match) => {
                if tag_list_matches(if_none_match, &self.etag) {
                    return Precondition::NotModified;
                }
            }
            None => {
                if let Some(since) = header_str(headers, header::IF_MODIFIED_SINCE) {
                    if self.not_modified_since(since) {
                        return Precondition::NotModified;
                    }
                }
            }
        }

        Precondition::Proceed
    }

    /// Whether a `Range` header may be honored given `If-Range`.
    ///
    /// `If-Range` carries either an entity tag or an HTTP-date; when it no
    /// longer describes the entity the client must receive the full body.
    pub fn range_allowed(&self, headers: &HeaderMap) -> bool {
        let Some(if_range) = header_str(headers, header::IF_RANGE) else {
            return true;
        };
        let if_range = if_range.trim();
        if if_range.starts_with('"') || if_range.starts_with("W/") {
            // weak tags never satisfy If-Range
            return !if_range.starts_with("W/") && strip_tag(if_range) == self.etag;
        }
        self.not_modified_since(if_range)
    }

    fn not_modified_since(&self, date: &str) -> bool {
        match httpdate::parse_http_date(date.trim()) {
            Ok(since) => {
                let since = since
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                self.last_modified <= since
            }
            Err(_) => false,
        }
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag).trim().trim_matches('"')
}

/// True when the comma-separated list is `*` or names `etag`.
fn tag_list_matches(list: &str, etag: &str) -> bool {
    list.split(',')
        .map(strip_tag)
        .any(|tag| tag == "*" || tag == etag)
}
