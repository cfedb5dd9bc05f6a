//! Per-request context handed to route actions.
//!
//! # Responsibilities
//! - Expose the parsed request: method, path, query, headers, parameters, uploads
//! - Accumulate response headers until the action commits a response
//! - Guarantee at most one response per request
//!
//! # Design Decisions
//! - The committed response is held in an `Option`; a second send is refused
//!   with `ContextError::AlreadyCommitted` instead of writing twice
//! - An action that never sends yields 200 with an empty body

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version},
    response::Response,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::http::file::{self, HttpFile};
use crate::http::params::{self, ParamMap, UploadedFile};
use crate::security::headers::client_address;

/// Misuse of the response side of a context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("a response was already sent for this request")]
    AlreadyCommitted,

    #[error("invalid response header `{0}`")]
    InvalidHeader(String),
}

/// Everything a route action sees of one request.
pub struct HttpContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    peer: SocketAddr,
    route_path: String,
    params: ParamMap,
    files: Vec<UploadedFile>,
    response_headers: HeaderMap,
    response: Option<Response>,
    config: Arc<ServerConfig>,
}

impl HttpContext {
    /// Build a context, unifying query and body parameters.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        body: Bytes,
        peer: SocketAddr,
        route_path: impl Into<String>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let unified = params::unify(&method, uri.query(), &headers, body.clone(), &config.uploads).await;
        Self {
            method,
            uri,
            version,
            headers,
            body,
            peer,
            route_path: route_path.into(),
            params: unified.params,
            files: unified.files,
            response_headers: HeaderMap::new(),
            response: None,
            config,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Request path, without the query.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// The route path the request matched.
    pub fn route_path(&self) -> &str {
        &self.route_path
    }

    /// Raw query string, still percent-encoded.
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a request header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// Take ownership of the uploads; the caller relocates or deletes them.
    pub fn take_files(&mut self) -> Vec<UploadedFile> {
        std::mem::take(&mut self.files)
    }

    /// The buffered request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Client address as reported by proxies, else the transport peer.
    pub fn remote_address(&self) -> String {
        client_address(&self.headers, self.peer)
    }

    /// Add a header to whatever response is eventually sent.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> Result<(), ContextError> {
        let invalid = || ContextError::InvalidHeader(name.to_string());
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response_headers
    }

    pub fn is_committed(&self) -> bool {
        self.response.is_some()
    }

    /// Send a complete response. `headers` override accumulated ones.
    pub fn send(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Result<(), ContextError> {
        self.ensure_open()?;
        let body = body.into();
        let mut all = std::mem::take(&mut self.response_headers);
        for (name, value) in headers.iter() {
            all.insert(name.clone(), value.clone());
        }
        if !body.is_empty() && !all.contains_key(header::CONTENT_TYPE) {
            all.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        }
        self.commit(status, all, Body::from(body));
        Ok(())
    }

    /// Send a status with an empty body.
    pub fn send_error(&mut self, status: StatusCode) -> Result<(), ContextError> {
        self.ensure_open()?;
        let headers = std::mem::take(&mut self.response_headers);
        self.commit(status, headers, Body::empty());
        Ok(())
    }

    /// Send a file with range and conditional negotiation.
    pub async fn send_file(&mut self, file: &HttpFile, attachment: bool) -> Result<(), ContextError> {
        self.ensure_open()?;
        let base = std::mem::take(&mut self.response_headers);
        let response = file::respond(&self.headers, base, file, attachment, &self.config.files).await;
        self.response = Some(response);
        Ok(())
    }

    /// The committed response, or 200 with the accumulated headers.
    pub fn into_response(self) -> Response {
        match self.response {
            Some(response) => response,
            None => {
                let mut response = Response::new(Body::empty());
                *response.headers_mut() = self.response_headers;
                response
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ContextError> {
        if self.is_committed() {
            tracing::warn!(path = %self.uri.path(), "response already sent, ignoring second send");
            return Err(ContextError::AlreadyCommitted);
        }
        Ok(())
    }

    fn commit(&mut self, status: StatusCode, headers: HeaderMap, body: Body) {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        self.response = Some(response);
    }
}

impl std::fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("route_path", &self.route_path)
            .field("committed", &self.is_committed())
            .finish_non_exhaustive()
    }
}
