//! Request parameter unification.
//!
//! # Data Flow
//! ```text
//! query string ──────────────┐
//! POST x-www-form-urlencoded ┼─→ ParamMap (ordered, multi-valued)
//! POST multipart/form-data ──┘      └─ file parts → Vec<UploadedFile>
//! ```
//!
//! # Design Decisions
//! - Keys with a bracket suffix (`name[0]`, `tags[]`) fold to their base name
//! - Insertion order is preserved, repeated keys accumulate values
//! - Multipart decoding and temp-file writes run on the blocking pool

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::form_urlencoded;

use crate::config::UploadConfig;
use crate::http::multipart::{self, MultipartDecoder, MultipartError, Part, PartData};

/// Ordered multi-valued parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under the folded form of `key`.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        let key = fold_key(key);
        match self.index.get(key) {
            Some(&slot) => self.entries[slot].1.push(value.into()),
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), vec![value.into()]));
            }
        }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// All values for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.index
            .get(key)
            .map(|&slot| self.entries[slot].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `name[0]` → `name`.
pub fn fold_key(key: &str) -> &str {
    match key.find('[') {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// Decode a query string (or url-encoded body) into `params`.
///
/// Pairs may be separated by `&` or `;`; a key without `=` gets an empty value.
pub fn decode_query(query: &str, params: &mut ParamMap) {
    for pair in query.split(['&', ';']).filter(|p| !p.is_empty()) {
        if let Some((key, value)) = form_urlencoded::parse(pair.as_bytes()).next() {
            params.append(&key, value.into_owned());
        }
    }
}

/// A file part materialized to durable temporary storage.
///
/// The file is not removed when this value drops; whoever consumes the
/// upload relocates or deletes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file arrived under.
    pub field_name: String,
    /// Filename the client declared.
    pub filename: String,
    pub mime: String,
    pub path: PathBuf,
}

/// Parameters and uploads extracted from one request.
#[derive(Debug, Default)]
pub struct RequestParams {
    pub params: ParamMap,
    pub files: Vec<UploadedFile>,
}

/// Merge the query string and, for POST, the body into one parameter space.
pub async fn unify(
    method: &Method,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
    uploads: &UploadConfig,
) -> RequestParams {
    let mut out = RequestParams::default();
    if let Some(query) = query {
        decode_query(query, &mut out.params);
    }
    if method != Method::POST {
        return out;
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/x-www-form-urlencoded" => {
            let mut params = std::mem::take(&mut out.params);
            let decoded = tokio::task::spawn_blocking(move || {
                match std::str::from_utf8(&body) {
                    Ok(text) => decode_query(text, &mut params),
                    Err(_) => tracing::warn!("url-encoded body is not valid UTF-8, ignored"),
                }
                params
            })
            .await;
            match decoded {
                Ok(params) => out.params = params,
                Err(e) => tracing::error!(error = %e, "url-encoded decoding task failed"),
            }
        }
        "multipart/form-data" => {
            let boundary = match multipart::parse_boundary(content_type) {
                Ok(boundary) => boundary,
                Err(e) => {
                    tracing::warn!(error = %e, "multipart body without usable boundary");
                    return out;
                }
            };
            let uploads = uploads.clone();
            let mut params = std::mem::take(&mut out.params);
            let decoded = tokio::task::spawn_blocking(move || {
                let files = decode_multipart(&body, &boundary, &uploads, &mut params);
                (params, files)
            })
            .await;
            match decoded {
                Ok((params, files)) => {
                    out.params = params;
                    out.files = files;
                }
                Err(e) => tracing::error!(error = %e, "multipart decoding task failed"),
            }
        }
        _ => {}
    }
    out
}

/// Walk every part; attributes land in `params`, files are materialized.
///
/// A faulty part is logged and skipped. The decoder and any spill files it
/// still owns are released before returning.
pub fn decode_multipart(
    body: &[u8],
    boundary: &str,
    uploads: &UploadConfig,
    params: &mut ParamMap,
) -> Vec<UploadedFile> {
    let temp_dir = uploads.temp_dir();
    let mut files = Vec::new();
    let mut decoder = MultipartDecoder::new(body, boundary, uploads.memory_threshold, &temp_dir);

    for part in decoder.by_ref() {
        let result = part.and_then(|part| match part.filename.clone() {
            Some(filename) => {
                materialize(part, filename, &temp_dir).map(|file| files.push(file))
            }
            None => part.text().map(|value| params.append(&part.name, value)),
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "skipping multipart part");
        }
    }
    drop(decoder);
    files
}

/// Move a file part into a freshly created temporary file.
fn materialize(part: Part, filename: String, temp_dir: &Path) -> Result<UploadedFile, MultipartError> {
    let mime = part
        .content_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(&filename).first_or_octet_stream().to_string());

    let (mut target, path) = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(temp_dir)?
        .keep()
        .map_err(|e| MultipartError::Io(e.error))?;

    match part.data {
        PartData::Memory(bytes) => {
            std::io::Write::write_all(&mut target, &bytes)?;
        }
        PartData::Disk(spill) => {
            drop(target);
            relocate(spill, &path)?;
        }
    }

    Ok(UploadedFile {
        field_name: part.name,
        filename,
        mime,
        path,
    })
}

/// Move a spill file onto `path`, removing `path` if the move fails.
fn relocate(spill: tempfile::NamedTempFile, path: &Path) -> Result<(), MultipartError> {
    if let Err(e) = spill.persist(path) {
        if let Err(cleanup) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %cleanup, "orphaned upload file");
        }
        return Err(MultipartError::Io(e.error));
    }
    Ok(())
}
