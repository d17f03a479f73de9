//! Server-sent events for streaming routes.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::dispatch::{DispatchError, Dispatcher, InboundRequest};
use crate::registry::Reply;

use super::render::{CORS_HEADERS, json_text};

/// Writes the response head and then one event per poll until the handler
/// ends the stream or the client goes away. Returns the number of events.
pub(super) fn stream_events(
    writer: &mut dyn Write,
    dispatcher: &Dispatcher,
    request: &InboundRequest,
    interval: Duration,
) -> io::Result<usize> {
    writer.write_all(head().as_bytes())?;
    writer.flush()?;
    let mut sent = 0;
    while let Some(event) = event_text(dispatcher.call(request.clone())) {
        writer.write_all(event.as_bytes())?;
        writer.flush()?;
        sent += 1;
        thread::sleep(interval);
    }
    Ok(sent)
}

fn head() -> String {
    let mut head = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n",
    );
    for (name, value) in CORS_HEADERS {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    head
}

/// One `key: value` line per entry and a blank line, or `None` when the
/// stream is over.
pub(super) fn event_text(result: Result<Reply, DispatchError>) -> Option<String> {
    match result {
        Ok(Reply::Json(Value::Object(entries))) => {
            let mut event: String = entries
                .iter()
                .map(|(key, value)| format!("{key}: {}\n", json_text(value)))
                .collect();
            event.push('\n');
            Some(event)
        }
        Ok(Reply::Json(Value::Bool(false) | Value::Null) | Reply::Download { .. }) | Err(_) => {
            None
        }
        Ok(Reply::Json(other)) => Some(format!("data: {}\n\n", json_text(&other))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mapping_becomes_key_value_lines() {
        let event = event_text(Ok(Reply::Json(json!({"count": 2, "label": "tick"}))));
        assert_eq!(event.as_deref(), Some("count: 2\nlabel: tick\n\n"));
    }

    #[test]
    fn false_or_failure_ends_the_stream() {
        assert_eq!(event_text(Ok(Reply::from(false))), None);
        assert_eq!(event_text(Err(DispatchError::QueueClosed)), None);
    }

    #[test]
    fn head_announces_an_event_stream() {
        let head = head();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/event-stream\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
