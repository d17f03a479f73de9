//! Maps HTTP requests onto the dispatcher and the fixed admin routes.

use std::fs;
use std::io::Read;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tiny_http::{Method, Request};
use tracing::{debug, info, warn};
use url::Url;

use crate::dispatch::{Dispatcher, Headers, InboundRequest};
use crate::process::{StopReason, StopToken};
use crate::registry::{HandlerKind, RouteTable};

use super::render::{self, BytesResponse, Flavour};
use super::stream;
use super::{LISTENER_TARGET, RequestHandler};

const RESOURCES_PREFIX: &str = "/resources/";
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Why a request body was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyRejection {
    TooLarge,
    Unreadable,
}

impl BodyRejection {
    const fn status(self) -> u16 {
        match self {
            Self::TooLarge => 413,
            Self::Unreadable => 400,
        }
    }
}

enum Answer {
    Respond(BytesResponse),
    Events {
        request: InboundRequest,
        interval: Duration,
    },
}

/// Request handler shared by every connection thread.
pub(crate) struct HttpGateway {
    dispatcher: Dispatcher,
    routes: RouteTable,
    resources: Utf8PathBuf,
    stop: StopToken,
}

impl HttpGateway {
    pub(crate) const fn new(
        dispatcher: Dispatcher,
        routes: RouteTable,
        resources: Utf8PathBuf,
        stop: StopToken,
    ) -> Self {
        Self {
            dispatcher,
            routes,
            resources,
            stop,
        }
    }

    fn answer(&self, request: &mut Request) -> Answer {
        let method = request.method().clone();
        let Ok(url) = Url::parse("http://localhost").and_then(|base| base.join(request.url()))
        else {
            return Answer::Respond(render::text("false", 400));
        };
        let path = url.path();
        debug!(target: LISTENER_TARGET, method = %method, path, "request received");
        match method {
            Method::Options => Answer::Respond(render::preflight()),
            Method::Get if path == "/ping" => Answer::Respond(render::text("pong", 200)),
            Method::Delete if path == "/stop" => {
                info!(target: LISTENER_TARGET, "stop requested over HTTP");
                self.stop.trigger(StopReason::StopRoute);
                Answer::Respond(render::text("stopped", 200))
            }
            Method::Get => match path.strip_prefix(RESOURCES_PREFIX) {
                Some(relative) => Answer::Respond(self.resource(relative)),
                None => {
                    let mut headers = headers_of(request);
                    headers.insert("content-type", "application/json");
                    self.forward(path, headers, query_object(&url), Flavour::Html)
                }
            },
            Method::Post => match read_body(request.as_reader()) {
                Ok(body) => self.forward(path, headers_of(request), body, Flavour::Json),
                Err(rejection) => Answer::Respond(render::text("false", rejection.status())),
            },
            _ => Answer::Respond(render::text("false", 405)),
        }
    }

    fn forward(&self, path: &str, headers: Headers, body: Vec<u8>, flavour: Flavour) -> Answer {
        let request = InboundRequest::new(path)
            .with_headers(headers)
            .with_body(body);
        match self.routes.get(path) {
            Some(route) if route.kind == HandlerKind::Streaming => Answer::Events {
                request,
                interval: route.interval.unwrap_or(Duration::from_secs(1)),
            },
            _ => Answer::Respond(render::reply(self.dispatcher.call(request), flavour)),
        }
    }

    fn resource(&self, relative: &str) -> BytesResponse {
        let Some(path) = confined_join(&self.resources, relative) else {
            warn!(target: LISTENER_TARGET, relative, "resource path rejected");
            return render::text("false", 404);
        };
        match fs::read(&path) {
            Ok(data) => render::resource(data, mime_type(&path)),
            Err(error) => {
                debug!(target: LISTENER_TARGET, file = %path, %error, "resource unavailable");
                render::text("false", 404)
            }
        }
    }
}

impl RequestHandler for HttpGateway {
    fn handle(&self, mut request: Request) {
        match self.answer(&mut request) {
            Answer::Respond(response) => {
                if let Err(error) = request.respond(response) {
                    debug!(target: LISTENER_TARGET, %error, "client went away before the reply");
                }
            }
            Answer::Events { request: inbound, interval } => {
                let mut writer = request.into_writer();
                match stream::stream_events(writer.as_mut(), &self.dispatcher, &inbound, interval) {
                    Ok(events) => debug!(
                        target: LISTENER_TARGET,
                        path = %inbound.path,
                        events,
                        "event stream ended"
                    ),
                    Err(error) => debug!(
                        target: LISTENER_TARGET,
                        path = %inbound.path,
                        %error,
                        "event stream closed by client"
                    ),
                }
            }
        }
    }
}

fn headers_of(request: &Request) -> Headers {
    request
        .headers()
        .iter()
        .map(|header| (header.field.as_str().as_str(), header.value.as_str()))
        .collect()
}

/// GET arguments as a JSON object, keeping the first value of each key.
fn query_object(url: &Url) -> Vec<u8> {
    let mut args = Map::new();
    for (key, value) in url.query_pairs() {
        args.entry(key.into_owned())
            .or_insert_with(|| Value::String(value.into_owned()));
    }
    Value::Object(args).to_string().into_bytes()
}

fn read_body<R: Read>(reader: R) -> Result<Vec<u8>, BodyRejection> {
    let mut body = Vec::new();
    match reader.take(MAX_BODY_BYTES + 1).read_to_end(&mut body) {
        Ok(_) if body.len() as u64 <= MAX_BODY_BYTES => Ok(body),
        Ok(_) => Err(BodyRejection::TooLarge),
        Err(error) => {
            warn!(target: LISTENER_TARGET, %error, "failed to read request body");
            Err(BodyRejection::Unreadable)
        }
    }
}

/// Joins `relative` under `root`, refusing anything that could escape it.
fn confined_join(root: &Utf8Path, relative: &str) -> Option<Utf8PathBuf> {
    let mut path = root.to_owned();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['\\', '%'])
        {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

fn mime_type(path: &Utf8Path) -> &'static str {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
