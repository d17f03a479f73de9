//! Turns dispatch results into HTTP responses.

use std::io::Cursor;

use serde_json::Value;
use tiny_http::{Header, Response, StatusCode};

use crate::dispatch::DispatchError;
use crate::registry::Reply;

pub(super) type BytesResponse = Response<Cursor<Vec<u8>>>;

pub(super) const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("Cache-Control", "no-cache, no-store, must-revalidate"),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

/// Body format chosen by the request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flavour {
    /// `text/html`, used for GET.
    Html,
    /// `application/json`, used for POST.
    Json,
}

impl Flavour {
    const fn content_type(self) -> &'static str {
        match self {
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// Adds headers, skipping any that are not valid header bytes.
pub(super) fn with_headers<R: std::io::Read>(
    mut response: Response<R>,
    headers: &[(&str, &str)],
) -> Response<R> {
    for (name, value) in headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response = response.with_header(header);
        }
    }
    response
}

/// Plain text response with CORS headers.
pub(super) fn text(body: &str, status: u16) -> BytesResponse {
    let response = Response::from_data(body.as_bytes().to_vec()).with_status_code(StatusCode(status));
    with_headers(
        with_headers(response, &[("Content-Type", "text/plain; charset=utf-8")]),
        &CORS_HEADERS,
    )
}

/// Empty 204 answer to a CORS preflight.
pub(super) fn preflight() -> BytesResponse {
    with_headers(
        Response::from_data(Vec::new()).with_status_code(StatusCode(204)),
        &CORS_HEADERS,
    )
}

/// Static file with caching disabled.
pub(super) fn resource(data: Vec<u8>, mime: &str) -> BytesResponse {
    let response = with_headers(Response::from_data(data), &[("Content-Type", mime)]);
    with_headers(with_headers(response, &NO_CACHE_HEADERS), &CORS_HEADERS)
}

/// Renders a handler result. Every failure is written as `false`.
pub(super) fn reply(result: Result<Reply, DispatchError>, flavour: Flavour) -> BytesResponse {
    let response = match result {
        Ok(Reply::Json(value)) => with_headers(
            Response::from_data(json_text(&value).into_bytes()),
            &[("Content-Type", flavour.content_type())],
        ),
        Ok(Reply::Download { data, filename }) => {
            let disposition = format!("attachment; filename={filename}");
            with_headers(
                Response::from_data(data),
                &[
                    ("Content-Type", "application/octet-stream"),
                    ("Content-Disposition", disposition.as_str()),
                ],
            )
        }
        Err(error) => {
            let status = match error {
                DispatchError::RouteNotFound(_) => 404,
                _ => 200,
            };
            with_headers(
                Response::from_data(b"false".to_vec()).with_status_code(StatusCode(status)),
                &[("Content-Type", flavour.content_type())],
            )
        }
    };
    with_headers(response, &CORS_HEADERS)
}

/// Strings are written raw; every other value as JSON.
pub(super) fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strings_are_written_raw() {
        assert_eq!(json_text(&json!("pong")), "pong");
        assert_eq!(json_text(&json!({"a": [1, true]})), r#"{"a":[1,true]}"#);
        assert_eq!(json_text(&json!(false)), "false");
    }

    #[test]
    fn failures_render_false_with_route_misses_as_404() {
        let missing = reply(
            Err(DispatchError::RouteNotFound(crate::registry::RouteNotFound {
                path: String::from("/nope"),
            })),
            Flavour::Json,
        );
        assert_eq!(missing.status_code(), StatusCode(404));
        let failed = reply(Err(DispatchError::QueueClosed), Flavour::Html);
        assert_eq!(failed.status_code(), StatusCode(200));
    }
}
