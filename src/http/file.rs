//! Range-aware file responses.
//!
//! # Data Flow
//! ```text
//! HttpFile
//!     → metadata (exists? readable?)          ── no → 404
//!     → EntityValidator::evaluate             ── 304 / 412 / 416
//!     → ETag, Last-Modified, Cache-Control, Content-Disposition
//!     → parse_ranges (gated by If-Range)
//!         none     → 200, whole file
//!         one      → 206, Content-Range, one region
//!         several  → 206, multipart/byteranges, region per part
//! ```
//!
//! # Design Decisions
//! - Every region opens its own file handle and drops it when the region
//!   finishes streaming, successfully or not
//! - Regions are chained in range order; a part is never polled before the
//!   previous one has completed
//! - The multipart body has no Content-Length; the transport frames it

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures_util::{
    future::{self, BoxFuture},
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use percent_encoding::percent_decode_str;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use url::form_urlencoded;

use crate::config::FileConfig;
use crate::http::conditional::{EntityValidator, Precondition};
use crate::http::context::HttpContext;
use crate::http::params::UploadedFile;
use crate::http::range::{parse_ranges, ByteRange};
use crate::observability::metrics;
use crate::routing::RouteAction;

/// A file to send, with the name and type presented to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFile {
    pub path: PathBuf,
    pub filename: String,
    pub mime: String,
}

impl HttpFile {
    /// Name and MIME type are derived from the path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();
        Self { path, filename, mime }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }
}

impl From<UploadedFile> for HttpFile {
    fn from(upload: UploadedFile) -> Self {
        Self {
            path: upload.path,
            filename: upload.filename,
            mime: upload.mime,
        }
    }
}

/// Build the complete response for `file`.
///
/// `base` holds headers already accumulated for the request (CORS and
/// anything the handler set); they are carried on every outcome.
pub async fn respond(
    request: &HeaderMap,
    base: HeaderMap,
    file: &HttpFile,
    attachment: bool,
    policy: &FileConfig,
) -> Response {
    let meta = match tokio::fs::metadata(&file.path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return empty(StatusCode::NOT_FOUND, base),
    };
    if tokio::fs::File::open(&file.path).await.is_err() {
        return empty(StatusCode::NOT_FOUND, base);
    }

    let len = meta.len();
    let validator = EntityValidator::new(len, meta.modified().unwrap_or(UNIX_EPOCH));

    let mut headers = base.clone();
    set(&mut headers, header::CONTENT_TYPE, &file.mime);

    match validator.evaluate(request) {
        Precondition::Proceed => {}
        Precondition::NotModified => {
            set_cache_headers(&mut headers, &validator, policy);
            metrics::record_file_response("not_modified");
            return empty(StatusCode::NOT_MODIFIED, headers);
        }
        Precondition::RangeNotSatisfiable => return unsatisfiable(base, len),
        Precondition::PreconditionFailed => {
            return empty(StatusCode::PRECONDITION_FAILED, base);
        }
    }

    set_cache_headers(&mut headers, &validator, policy);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if attachment {
        let encoded: String = form_urlencoded::byte_serialize(file.filename.as_bytes()).collect();
        set(
            &mut headers,
            header::CONTENT_DISPOSITION,
            &format!("attachment; filename=\"{encoded}\""),
        );
    }

    let range_header = if validator.range_allowed(request) {
        request.get(header::RANGE).and_then(|v| v.to_str().ok())
    } else {
        None
    };
    let ranges = match parse_ranges(range_header, len) {
        Ok(ranges) => ranges,
        Err(e) => {
            tracing::debug!(path = %file.path.display(), error = %e, "range not satisfiable");
            return unsatisfiable(base, len);
        }
    };

    match ranges.as_slice() {
        [] => {
            metrics::record_file_response("full");
            set(&mut headers, header::CONTENT_LENGTH, &len.to_string());
            with_body(
                StatusCode::OK,
                headers,
                Body::from_stream(region(file.path.clone(), 0, len)),
            )
        }
        [range] => {
            metrics::record_file_response("single_range");
            set(&mut headers, header::CONTENT_LENGTH, &range.size().to_string());
            set(&mut headers, header::CONTENT_RANGE, &range.content_range(len));
            with_body(
                StatusCode::PARTIAL_CONTENT,
                headers,
                Body::from_stream(region(file.path.clone(), range.start, range.size())),
            )
        }
        ranges => {
            metrics::record_file_response("multi_range");
            let boundary = uuid::Uuid::new_v4().simple().to_string();
            set(
                &mut headers,
                header::CONTENT_TYPE,
                &format!("multipart/byteranges; boundary={boundary}"),
            );
            headers.remove(header::CONTENT_LENGTH);
            let body = multipart_body(&file.path, &file.mime, ranges, len, &boundary);
            with_body(StatusCode::PARTIAL_CONTENT, headers, body)
        }
    }
}

fn set_cache_headers(headers: &mut HeaderMap, validator: &EntityValidator, policy: &FileConfig) {
    set(headers, header::ETAG, &validator.quoted_etag());
    set(headers, header::LAST_MODIFIED, &validator.http_date());
    set(
        headers,
        header::CACHE_CONTROL,
        &format!("public, max-age={}", policy.cache_max_age_secs),
    );
}

fn set(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "dropping header with invalid value"),
    }
}

fn unsatisfiable(mut headers: HeaderMap, len: u64) -> Response {
    metrics::record_file_response("unsatisfiable");
    set(&mut headers, header::CONTENT_RANGE, &format!("bytes */{len}"));
    empty(StatusCode::RANGE_NOT_SATISFIABLE, headers)
}

fn empty(status: StatusCode, headers: HeaderMap) -> Response {
    with_body(status, headers, Body::empty())
}

fn with_body(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Stream `len` bytes of `path` starting at `start`.
///
/// The file is opened lazily when the body is first polled and closed when
/// the region is exhausted or the body is dropped.
fn region(path: PathBuf, start: u64, len: u64) -> BoxStream<'static, io::Result<Bytes>> {
    stream::once(async move {
        let mut file = tokio::fs::File::open(&path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        Ok::<_, io::Error>(ReaderStream::new(file.take(len)))
    })
    .try_flatten()
    .boxed()
}

fn chunk(text: String) -> BoxStream<'static, io::Result<Bytes>> {
    stream::once(future::ready(Ok(Bytes::from(text)))).boxed()
}

fn multipart_body(path: &Path, mime: &str, ranges: &[ByteRange], len: u64, boundary: &str) -> Body {
    let mut parts = Vec::with_capacity(ranges.len() * 2 + 1);
    for range in ranges {
        parts.push(chunk(format!(
            "\r\n--{boundary}\r\nContent-Type: {mime}\r\nContent-Range: {}\r\n\r\n",
            range.content_range(len)
        )));
        parts.push(region(path.to_path_buf(), range.start, range.size()));
    }
    parts.push(chunk(format!("\r\n--{boundary}--\r\n")));
    Body::from_stream(stream::iter(parts).flatten())
}

/// Serves files below `root` for every path under `mount`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    mount: String,
    attachment: bool,
    methods: Vec<Method>,
}

impl StaticFiles {
    pub fn new(mount: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mount: mount.into().trim_end_matches('/').to_string(),
            attachment: false,
            methods: vec![Method::GET],
        }
    }

    /// Send files with `Content-Disposition: attachment`.
    pub fn attachment(mut self, attachment: bool) -> Self {
        self.attachment = attachment;
        self
    }

    /// Map a request path to a file below the root.
    ///
    /// Returns `None` for paths outside the mount or escaping the root.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let rest = strip_prefix_ignore_case(request_path, &self.mount)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let decoded = percent_decode_str(rest).decode_utf8().ok()?;

        let mut path = self.root.clone();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (path != self.root).then_some(path)
    }
}

fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &path[prefix.len()..])
}

impl RouteAction for StaticFiles {
    fn methods(&self) -> &[Method] {
        &self.methods
    }

    fn process<'a>(&'a self, ctx: &'a mut HttpContext) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let resolved = self.resolve(ctx.path());
            let result = match resolved {
                Some(path) => ctx.send_file(&HttpFile::new(path), self.attachment).await,
                None => ctx.send_error(StatusCode::NOT_FOUND),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "static file response not sent");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BODY: &[u8; 100] = b"0123456789abcdefghijABCDEFGHIJklmnopqrstKLMNOPQRST\
0123456789abcdefghijABCDEFGHIJklmnopqrstKLMNOPQRST";

    fn fixture() -> (tempfile::TempDir, HttpFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::File::create(&path).unwrap().write_all(BODY).unwrap();
        (dir, HttpFile::new(path))
    }

    fn request(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    async fn send(file: &HttpFile, req: HeaderMap, attachment: bool) -> (StatusCode, HeaderMap, Bytes) {
        let response = respond(&req, HeaderMap::new(), file, attachment, &FileConfig::default()).await;
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (parts.status, parts.headers, bytes)
    }

    fn value_of<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn full_file_then_not_modified() {
        let (_dir, file) = fixture();
        let (status, headers, body) = send(&file, HeaderMap::new(), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value_of(&headers, header::CONTENT_LENGTH), "100");
        assert_eq!(value_of(&headers, header::CONTENT_TYPE), "text/plain");
        assert_eq!(value_of(&headers, header::CACHE_CONTROL), "public, max-age=15552000");
        assert_eq!(value_of(&headers, header::ACCEPT_RANGES), "bytes");
        assert!(headers.get(header::CONTENT_DISPOSITION).is_none());
        assert_eq!(&body[..], &BODY[..]);

        let etag = value_of(&headers, header::ETAG).to_string();
        assert!(etag.starts_with("\"100-") && etag.ends_with('"'));

        let (status, headers, body) =
            send(&file, request(&[(header::IF_NONE_MATCH, &etag)]), false).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert_eq!(value_of(&headers, header::ETAG), etag);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn if_modified_since_last_modified_is_not_modified() {
        let (_dir, file) = fixture();
        let (_, headers, _) = send(&file, HeaderMap::new(), false).await;
        let last_modified = value_of(&headers, header::LAST_MODIFIED).to_string();
        let (status, _, _) =
            send(&file, request(&[(header::IF_MODIFIED_SINCE, &last_modified)]), false).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn if_match_mismatch() {
        let (_dir, file) = fixture();
        let (status, _, body) = send(&file, request(&[(header::IF_MATCH, "\"nope\"")]), false).await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(body.is_empty());

        let (status, _, _) = send(
            &file,
            request(&[(header::IF_MATCH, "\"nope\""), (header::RANGE, "bytes=0-9")]),
            false,
        )
        .await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn single_range() {
        let (_dir, file) = fixture();
        let (status, headers, body) =
            send(&file, request(&[(header::RANGE, "bytes=10-19")]), false).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(value_of(&headers, header::CONTENT_LENGTH), "10");
        assert_eq!(value_of(&headers, header::CONTENT_RANGE), "bytes 10-19/100");
        assert_eq!(&body[..], b"abcdefghij");
    }

    #[tokio::test]
    async fn multiple_ranges() {
        let (_dir, file) = fixture();
        let (status, headers, body) =
            send(&file, request(&[(header::RANGE, "bytes=0-9,20-29")]), false).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert!(headers.get(header::CONTENT_LENGTH).is_none());

        let content_type = value_of(&headers, header::CONTENT_TYPE);
        let boundary = content_type
            .strip_prefix("multipart/byteranges; boundary=")
            .unwrap();
        let expected = format!(
            "\r\n--{b}\r\nContent-Type: text/plain\r\nContent-Range: bytes 0-9/100\r\n\r\n0123456789\
\r\n--{b}\r\nContent-Type: text/plain\r\nContent-Range: bytes 20-29/100\r\n\r\nABCDEFGHIJ\
\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(std::str::from_utf8(&body).unwrap(), expected);
    }

    #[tokio::test]
    async fn bad_range_is_416() {
        let (_dir, file) = fixture();
        for range in ["bytes=abc", "bytes=500-600"] {
            let (status, headers, _) = send(&file, request(&[(header::RANGE, range)]), false).await;
            assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
            assert_eq!(value_of(&headers, header::CONTENT_RANGE), "bytes */100");
        }
    }

    #[tokio::test]
    async fn stale_if_range_serves_everything() {
        let (_dir, file) = fixture();
        let (status, _, body) = send(
            &file,
            request(&[(header::RANGE, "bytes=0-9"), (header::IF_RANGE, "\"stale\"")]),
            false,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), 100);
    }

    #[tokio::test]
    async fn attachment_disposition_is_encoded() {
        let (_dir, file) = fixture();
        let file = file.with_filename("my report ä.txt");
        let (_, headers, _) = send(&file, HeaderMap::new(), true).await;
        assert_eq!(
            value_of(&headers, header::CONTENT_DISPOSITION),
            "attachment; filename=\"my+report+%C3%A4.txt\""
        );
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let file = HttpFile::new(dir.path().join("absent.bin"));
        let (status, _, _) = send(&file, HeaderMap::new(), false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&HttpFile::new(dir.path()), HeaderMap::new(), false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn static_resolution_stays_under_root() {
        let files = StaticFiles::new("/files/", "/srv/www");
        assert_eq!(
            files.resolve("/files/css/site.css"),
            Some(PathBuf::from("/srv/www/css/site.css"))
        );
        assert_eq!(
            files.resolve("/FILES/a%20b.txt"),
            Some(PathBuf::from("/srv/www/a b.txt"))
        );
        assert_eq!(files.resolve("/files/../etc/passwd"), None);
        assert_eq!(files.resolve("/files/%2e%2e/secret"), None);
        assert_eq!(files.resolve("/files"), None);
        assert_eq!(files.resolve("/filesystem/x"), None);
        assert_eq!(files.resolve("/other/x"), None);
    }
}
