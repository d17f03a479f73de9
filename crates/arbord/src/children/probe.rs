//! Checks whether something already listens on a local port.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Answers whether a port on the service host accepts connections.
#[cfg_attr(test, mockall::automock)]
pub trait PortProbe: Send {
    /// True when a connection to `port` succeeds.
    fn is_listening(&self, port: u16) -> bool;
}

/// Probes by opening a TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPortProbe {
    host: String,
    timeout: Duration,
}

impl TcpPortProbe {
    /// Probes the host services bind to; wildcard hosts map to loopback.
    pub fn for_host(host: impl Into<String>) -> Self {
        let host = host.into();
        let host = match host.as_str() {
            "0.0.0.0" | "" => String::from("127.0.0.1"),
            "::" => String::from("::1"),
            _ => host,
        };
        Self {
            host,
            timeout: CONNECT_TIMEOUT,
        }
    }
}

impl Default for TcpPortProbe {
    fn default() -> Self {
        Self::for_host("127.0.0.1")
    }
}

impl PortProbe for TcpPortProbe {
    fn is_listening(&self, port: u16) -> bool {
        (self.host.as_str(), port)
            .to_socket_addrs()
            .map(|mut addrs| {
                addrs.any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
            })
            .unwrap_or(false)
    }
}
