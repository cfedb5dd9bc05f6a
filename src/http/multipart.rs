//! `multipart/form-data` decoding over a fully buffered body.
//!
//! Parts at or below the memory threshold stay in memory; larger parts are
//! spilled to a temporary file while decoding. Spill files are owned by the
//! part and removed on drop unless persisted.

use memchr::memmem;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// RFC 2046 caps boundaries at 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

/// Errors raised while decoding a multipart body.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("missing boundary in multipart Content-Type")]
    MissingBoundary,

    #[error("invalid multipart boundary")]
    InvalidBoundary,

    #[error("unexpected end of multipart data")]
    UnexpectedEof,

    #[error("invalid part headers: {0}")]
    InvalidHeaders(String),

    #[error("form field `{0}` is not valid UTF-8")]
    NotUtf8(String),

    #[error("multipart I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the content of a part lives.
#[derive(Debug)]
pub enum PartData {
    Memory(Vec<u8>),
    Disk(NamedTempFile),
}

/// One decoded part.
#[derive(Debug)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: PartData,
}

impl Part {
    /// Content as a string, for plain form fields.
    pub fn text(&self) -> Result<String, MultipartError> {
        let bytes = match &self.data {
            PartData::Memory(bytes) => bytes.clone(),
            PartData::Disk(file) => std::fs::read(file.path())?,
        };
        String::from_utf8(bytes).map_err(|_| MultipartError::NotUtf8(self.name.clone()))
    }
}

/// Extract the boundary parameter from a `Content-Type` value.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let boundary = content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"'))
        .ok_or(MultipartError::MissingBoundary)?;

    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(MultipartError::InvalidBoundary);
    }
    Ok(boundary.to_string())
}

/// Iterator over the parts of a buffered multipart body.
///
/// A part whose headers are broken yields an error and decoding continues
/// with the next part; a body without a closing delimiter ends iteration.
pub struct MultipartDecoder<'a> {
    body: &'a [u8],
    /// `\r\n--{boundary}`
    delimiter: Vec<u8>,
    pos: usize,
    memory_threshold: usize,
    spill_dir: &'a Path,
    started: bool,
    finished: bool,
}

impl<'a> MultipartDecoder<'a> {
    pub fn new(body: &'a [u8], boundary: &str, memory_threshold: usize, spill_dir: &'a Path) -> Self {
        Self {
            body,
            delimiter: format!("\r\n--{boundary}").into_bytes(),
            pos: 0,
            memory_threshold,
            spill_dir,
            started: false,
            finished: false,
        }
    }

    /// Skip the preamble up to and including the first delimiter line.
    fn skip_preamble(&mut self) -> Result<(), MultipartError> {
        let first = &self.delimiter[2..];
        let at = if self.body.starts_with(first) {
            0
        } else {
            memmem::find(self.body, &self.delimiter)
                .map(|idx| idx + 2)
                .ok_or(MultipartError::UnexpectedEof)?
        };
        self.pos = at + first.len();
        Ok(())
    }

    /// After a delimiter: `--` closes the body, CRLF opens another part.
    fn after_delimiter(&mut self) -> Result<bool, MultipartError> {
        let rest = &self.body[self.pos..];
        if rest.starts_with(b"--") {
            return Ok(false);
        }
        // transport padding before the CRLF is allowed
        let line_end = memmem::find(rest, b"\r\n").ok_or(MultipartError::UnexpectedEof)?;
        if !rest[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
            return Err(MultipartError::InvalidBoundary);
        }
        self.pos += line_end + 2;
        Ok(true)
    }

    fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        if !self.started {
            self.started = true;
            self.skip_preamble()?;
        }
        if !self.after_delimiter()? {
            return Ok(None);
        }

        let rest = &self.body[self.pos..];
        let content_end = memmem::find(rest, &self.delimiter).ok_or(MultipartError::UnexpectedEof)?;
        let raw = &rest[..content_end];
        self.pos += content_end + self.delimiter.len();

        let (head, content) = match memmem::find(raw, b"\r\n\r\n") {
            Some(idx) => (&raw[..idx], &raw[idx + 4..]),
            // a part with no headers at all starts with the blank line
            None if raw.starts_with(b"\r\n") => (&raw[..0], &raw[2..]),
            None => return Err(MultipartError::InvalidHeaders("missing blank line".into())),
        };

        let mut part = parse_headers(head)?;
        if content.len() > self.memory_threshold {
            let mut spill = tempfile::Builder::new()
                .prefix("multipart-")
                .tempfile_in(self.spill_dir)?;
            spill.write_all(content)?;
            spill.flush()?;
            part.data = PartData::Disk(spill);
        } else {
            part.data = PartData::Memory(content.to_vec());
        }
        Ok(Some(part))
    }
}

impl Iterator for MultipartDecoder<'_> {
    type Item = Result<Part, MultipartError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_part() {
            Ok(Some(part)) => Some(Ok(part)),
            Ok(None) => {
                self.finished = true;
                None
            }
            // header faults are local to their part
            Err(e @ MultipartError::InvalidHeaders(_)) => Some(Err(e)),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_headers(head: &[u8]) -> Result<Part, MultipartError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| MultipartError::InvalidHeaders("headers are not UTF-8".into()))?;

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    for line in head.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartError::InvalidHeaders(line.to_string()))?;
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.trim().split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => name = Some(v),
                    "filename" => filename = Some(v),
                    _ => {}
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") && !value.is_empty() {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or_else(|| MultipartError::InvalidHeaders("part has no name".into()))?;
    Ok(Part {
        name,
        filename,
        content_type,
        data: PartData::Memory(Vec::new()),
    })
}
