//! Listener thread wrapping a `tiny_http` server.

use std::fs;
use std::net::SocketAddr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use arbor_config::Config;
use tiny_http::{Request, Server, SslConfig};
use tracing::{debug, info, warn};

use super::{LISTENER_TARGET, ListenerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Handles accepted requests. Implementations must answer every request.
pub(crate) trait RequestHandler: Send + Sync + 'static {
    /// Handles a single request.
    fn handle(&self, request: Request);
}

/// Bound HTTP server, not yet accepting.
pub(crate) struct HttpListener {
    server: Server,
    address: String,
}

impl HttpListener {
    /// Binds the host and port of `config`, over TLS when configured.
    pub(crate) fn bind(config: &Config) -> Result<Self, ListenerError> {
        let address = format!("{}:{}", config.host, config.port);
        let bound = match &config.tls {
            None => Server::http(address.as_str()),
            Some(tls) => {
                let read = |path: &camino::Utf8Path| {
                    fs::read(path).map_err(|source| ListenerError::TlsFile {
                        path: path.to_owned(),
                        source,
                    })
                };
                let ssl = SslConfig {
                    certificate: read(&tls.certfile)?,
                    private_key: read(&tls.keyfile)?,
                };
                Server::https(address.as_str(), ssl)
            }
        };
        let server = bound.map_err(|source| ListenerError::Bind {
            address: address.clone(),
            source,
        })?;
        Ok(Self { server, address })
    }

    /// Address actually bound, useful when port 0 was requested.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Starts accepting on a background thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(String::from("arbord-listener"))
            .spawn(move || run_accept_loop(&self, &shutdown_flag, &handler))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background listener thread.
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &HttpListener,
    shutdown: &AtomicBool,
    handler: &Arc<dyn RequestHandler>,
) {
    info!(
        target: LISTENER_TARGET,
        address = %listener.address,
        "HTTP listener active"
    );
    let mut last_error = None;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.server.recv_timeout(ACCEPT_BACKOFF) {
            Ok(Some(request)) => {
                last_error = None;
                let handler = Arc::clone(handler);
                let spawned = thread::Builder::new()
                    .name(String::from("arbord-request"))
                    .spawn(move || handler.handle(request));
                if let Err(error) = spawned {
                    warn!(target: LISTENER_TARGET, %error, "failed to start request thread");
                }
            }
            Ok(None) => {}
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "HTTP accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!(target: LISTENER_TARGET, address = %listener.address, "HTTP listener stopped");
}
