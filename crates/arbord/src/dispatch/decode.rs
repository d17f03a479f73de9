//! Decodes request bodies according to the handler kind.

use serde_json::{Map, Value};

use crate::registry::{HandlerKind, Upload};

use super::multipart;
use super::request::Headers;

/// Arguments handed to a handler.
#[derive(Debug)]
pub(super) enum Params {
    None,
    Json(Value),
    Upload(Upload),
}

/// Decodes `body` for a handler of `kind`.
///
/// An empty body stands for an empty JSON object.
pub(super) fn decode(kind: HandlerKind, headers: &Headers, body: &[u8]) -> Result<Params, String> {
    match kind {
        HandlerKind::Interactive => Ok(Params::None),
        HandlerKind::Unary | HandlerKind::Streaming => decode_json(body).map(Params::Json),
        HandlerKind::UploadUnary => {
            let content_type = headers.get("content-type").unwrap_or_default();
            let boundary = multipart::boundary(content_type).map_err(|error| error.to_string())?;
            multipart::decode(&boundary, body)
                .map(Params::Upload)
                .map_err(|error| error.to_string())
        }
    }
}

fn decode_json(body: &[u8]) -> Result<Value, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let text = std::str::from_utf8(body).map_err(|error| format!("body is not UTF-8: {error}"))?;
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {}", kind_name(&other))),
        Err(error) => Err(format!("malformed JSON: {error}")),
    }
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
