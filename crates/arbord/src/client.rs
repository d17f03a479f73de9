//! HTTP client for talking to other services in the tree.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use ureq::Agent;
use ureq::tls::TlsConfig;
use url::Url;

use crate::dispatch::multipart::{self, DEFAULT_BOUNDARY, FilePart};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by [`ServiceClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service address or route did not form a valid URL.
    #[error("invalid service address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },
    /// The request could not be completed.
    #[error("request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    /// The service answered with an unexpected status.
    #[error("'{url}' answered with status {status}")]
    Status { url: String, status: u16 },
}

/// Decoded body of a service reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientReply {
    /// Body that parsed as JSON.
    Json(Value),
    /// Any other text.
    Text(String),
    /// Attachment download.
    Download {
        /// Name from the `Content-Disposition` header.
        filename: String,
        /// Raw contents.
        data: Vec<u8>,
    },
}

impl ClientReply {
    /// JSON payload, if the reply carried one.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// True when the service reported a failure.
    #[must_use]
    pub fn is_false(&self) -> bool {
        matches!(self, Self::Json(Value::Bool(false)))
    }
}

/// Blocking client bound to one service address.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    agent: Agent,
    base: Url,
    timeout: Duration,
    verify_tls: bool,
}

impl ServiceClient {
    /// Creates a client for the service reachable at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidAddress`] when `address` is not a URL.
    pub fn new(address: &str) -> Result<Self, ClientError> {
        let base = Url::parse(address).map_err(|source| ClientError::InvalidAddress {
            address: address.to_owned(),
            source,
        })?;
        Ok(Self {
            agent: build_agent(DEFAULT_TIMEOUT, true),
            base,
            timeout: DEFAULT_TIMEOUT,
            verify_tls: true,
        })
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = build_agent(self.timeout, self.verify_tls);
        self
    }

    /// Accepts any certificate; services in a tree share a self-signed one.
    #[must_use]
    pub fn without_tls_verification(mut self) -> Self {
        self.verify_tls = false;
        self.agent = build_agent(self.timeout, self.verify_tls);
        self
    }

    /// Base address of the service.
    #[must_use]
    pub fn address(&self) -> &str {
        self.base.as_str()
    }

    /// True when the service answers `pong`.
    #[must_use]
    pub fn ping(&self) -> bool {
        matches!(self.get("/ping", &[]), Ok(ClientReply::Text(text)) if text == "pong")
    }

    /// Sends a GET request with `query` arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<ClientReply, ClientError> {
        let mut url = self.route(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|source| request_error(&url, source))?;
        read_reply(&url, response)
    }

    /// Posts `body` as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub fn post_json(&self, path: &str, body: &Value) -> Result<ClientReply, ClientError> {
        let url = self.route(path)?;
        let payload = body.to_string();
        let response = self
            .agent
            .post(url.as_str())
            .header("content-type", "application/json")
            .send(payload.as_bytes())
            .map_err(|source| request_error(&url, source))?;
        read_reply(&url, response)
    }

    /// Posts form fields and an optional file as `multipart/form-data`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        file: Option<FilePart<'_>>,
    ) -> Result<ClientReply, ClientError> {
        let url = self.route(path)?;
        let body = multipart::encode(DEFAULT_BOUNDARY, fields, file);
        let response = self
            .agent
            .post(url.as_str())
            .header("content-type", multipart::content_type(DEFAULT_BOUNDARY))
            .send(body.as_slice())
            .map_err(|source| request_error(&url, source))?;
        read_reply(&url, response)
    }

    /// Asks the service to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the request fails.
    pub fn stop(&self) -> Result<bool, ClientError> {
        let url = self.route("/stop")?;
        let response = self
            .agent
            .delete(url.as_str())
            .call()
            .map_err(|source| request_error(&url, source))?;
        Ok(matches!(read_reply(&url, response)?, ClientReply::Text(text) if text == "stopped"))
    }

    fn route(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|source| ClientError::InvalidAddress {
                address: format!("{}{path}", self.base),
                source,
            })
    }
}

fn build_agent(timeout: Duration, verify_tls: bool) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .tls_config(
            TlsConfig::builder()
                .disable_verification(!verify_tls)
                .build(),
        )
        .build()
        .into()
}

fn request_error(url: &Url, source: ureq::Error) -> ClientError {
    ClientError::Request {
        url: url.to_string(),
        source: Box::new(source),
    }
}

fn read_reply(
    url: &Url,
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<ClientReply, ClientError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) && status != 404 {
        return Err(ClientError::Status {
            url: url.to_string(),
            status,
        });
    }
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    let content_type = header("content-type").unwrap_or_default();
    let disposition = header("content-disposition");
    let data = response
        .body_mut()
        .read_to_vec()
        .map_err(|source| request_error(url, source))?;
    if content_type.starts_with("application/octet-stream") {
        let filename = disposition
            .as_deref()
            .and_then(|value| value.split_once("filename="))
            .map(|(_, name)| name.trim().trim_matches('"').to_owned())
            .unwrap_or_default();
        return Ok(ClientReply::Download { filename, data });
    }
    Ok(serde_json::from_slice(&data).map_or_else(
        |_| ClientReply::Text(String::from_utf8_lossy(&data).into_owned()),
        ClientReply::Json,
    ))
}
