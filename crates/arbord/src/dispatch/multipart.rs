//! `multipart/form-data` encoding and decoding.
//!
//! Only the subset services exchange is supported: text fields plus at most
//! one file part, each part introduced by a `Content-Disposition: form-data`
//! header. The first part carrying a `filename` becomes the upload.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::registry::Upload;

/// Boundary used by [`encode`] callers that have no preference.
pub const DEFAULT_BOUNDARY: &str = "----ArborFormBoundary6ebd851a13baed30";

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Errors raised while decoding a multipart body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    /// The content type was not `multipart/form-data`.
    #[error("expected multipart/form-data, got '{content_type}'")]
    NotMultipart { content_type: String },
    /// The content type had no boundary parameter.
    #[error("multipart content type has no boundary")]
    MissingBoundary,
    /// The body did not contain the closing delimiter.
    #[error("multipart body is not terminated")]
    Unterminated,
    /// A part lacked the blank line separating headers from content.
    #[error("multipart part has no header terminator")]
    MalformedPart,
    /// A part had no `name` parameter.
    #[error("multipart part has no field name")]
    MissingName,
    /// A text field was not UTF-8.
    #[error("multipart field '{name}' is not UTF-8")]
    NonUtf8Field { name: String },
}

/// A file part for [`encode`].
#[derive(Debug, Clone, Copy)]
pub struct FilePart<'a> {
    /// Form field name.
    pub field: &'a str,
    /// File name reported to the receiver.
    pub filename: &'a str,
    /// File contents.
    pub data: &'a [u8],
}

/// Content type header value announcing `boundary`.
#[must_use]
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// Encodes text fields and an optional file part.
#[must_use]
pub fn encode(boundary: &str, fields: &[(&str, &str)], file: Option<FilePart<'_>>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(CRLF);
    }
    if let Some(part) = file {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.field, part.filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(CRLF);
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Extracts the boundary from a `Content-Type` header value.
///
/// # Errors
///
/// Returns [`MultipartError::NotMultipart`] or
/// [`MultipartError::MissingBoundary`].
pub fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';').map(str::trim);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart {
            content_type: content_type.to_owned(),
        });
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_owned())
        .filter(|value| !value.is_empty())
        .ok_or(MultipartError::MissingBoundary)
}

/// Decodes a multipart body delimited by `boundary`.
///
/// # Errors
///
/// Returns [`MultipartError`] when the body is not well formed.
pub fn decode(boundary: &str, body: &[u8]) -> Result<Upload, MultipartError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut upload = Upload::default();
    let mut remaining = match find(body, &delimiter) {
        Some(start) => body.get(start + delimiter.len()..).unwrap_or_default(),
        None => return Err(MultipartError::Unterminated),
    };
    loop {
        if remaining.starts_with(b"--") {
            return Ok(upload);
        }
        let Some(end) = find(remaining, &delimiter) else {
            return Err(MultipartError::Unterminated);
        };
        let (part, rest) = remaining.split_at(end);
        read_part(trim_part(part), &mut upload)?;
        remaining = rest.get(delimiter.len()..).unwrap_or_default();
    }
}

fn trim_part(part: &[u8]) -> &[u8] {
    let part = part.strip_prefix(CRLF).unwrap_or(part);
    part.strip_suffix(CRLF).unwrap_or(part)
}

fn read_part(part: &[u8], upload: &mut Upload) -> Result<(), MultipartError> {
    let split = find(part, HEADER_END).ok_or(MultipartError::MalformedPart)?;
    let (head, content) = part.split_at(split);
    let content = content.get(HEADER_END.len()..).unwrap_or_default();
    let head = String::from_utf8_lossy(head);
    let disposition = head
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))
        .map(|(_, value)| value.trim().to_owned())
        .unwrap_or_default();
    let params = disposition_params(&disposition);
    let name = params
        .get("name")
        .cloned()
        .ok_or(MultipartError::MissingName)?;
    match params.get("filename") {
        Some(filename) if !upload.has_file() => {
            upload.filename.clone_from(filename);
            upload.data = content.to_vec();
        }
        Some(_) => {}
        None => {
            let value = String::from_utf8(content.to_vec())
                .map_err(|_| MultipartError::NonUtf8Field { name: name.clone() })?;
            upload.args.insert(name, value);
        }
    }
    Ok(())
}

fn disposition_params(disposition: &str) -> BTreeMap<String, String> {
    disposition
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_owned(),
            )
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
