//! TCP transport allocator for courier pools.
//!
//! The simplest useful [`TransportAllocator`]: pooled transports are raw
//! `tokio::net::TcpStream`s. Protocol-session allocators (SMTP and
//! friends) follow the same shape, connecting in `allocate`, probing in
//! `validate` and tearing down in `deallocate`, with their handshake
//! layered into `allocate`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use courier_common::{CourierError, CourierResult};
use courier_pool::TransportAllocator;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Default time allowed for a TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One remote TCP endpoint, the pool's partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpEndpoint {
    host: String,
    port: u16,
}

impl TcpEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TcpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for TcpEndpoint {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CourierError::config(format!("'{s}' is not host:port")))?;
        if host.is_empty() {
            return Err(CourierError::config(format!("'{s}' has an empty host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| CourierError::config(format!("'{s}' has an invalid port")))?;
        Ok(Self::new(host, port))
    }
}

/// Allocates pooled `TcpStream`s.
pub struct TcpAllocator {
    connect_timeout: Duration,
}

impl TcpAllocator {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAllocator for TcpAllocator {
    type Descriptor = TcpEndpoint;
    type Transport = TcpStream;

    async fn allocate(&self, descriptor: &TcpEndpoint) -> CourierResult<TcpStream> {
        let addr = descriptor.to_string();
        match timeout(self.connect_timeout, TcpStream::connect(addr.as_str())).await {
            Ok(Ok(stream)) => {
                debug!(endpoint = %addr, "tcp connection established");
                Ok(stream)
            }
            Ok(Err(err)) => Err(CourierError::allocation_with_source(
                addr,
                "connect failed",
                err,
            )),
            Err(_) => Err(CourierError::allocation(
                addr,
                format!("connect timed out after {:?}", self.connect_timeout),
            )),
        }
    }

    async fn validate(&self, transport: &mut TcpStream) -> bool {
        // A peer that closed the connection shows up as an instantly-ready
        // zero-byte peek; an open but quiet socket leaves the peek pending.
        let mut probe = [0u8; 1];
        match timeout(Duration::from_millis(1), transport.peek(&mut probe)).await {
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                trace!(error = %err, "tcp liveness probe failed");
                false
            }
            Err(_) => true,
        }
    }

    async fn deallocate(&self, mut transport: TcpStream) {
        if let Err(err) = transport.shutdown().await {
            debug!(error = %err, "tcp shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = TcpEndpoint::new("smtp.example.com", 587);
        assert_eq!(endpoint.to_string(), "smtp.example.com:587");
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint: TcpEndpoint = "smtp.example.com:587".parse().unwrap();
        assert_eq!(endpoint.host(), "smtp.example.com");
        assert_eq!(endpoint.port(), 587);
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!("no-port".parse::<TcpEndpoint>().is_err());
        assert!(":587".parse::<TcpEndpoint>().is_err());
        assert!("host:notaport".parse::<TcpEndpoint>().is_err());
        assert!("host:70000".parse::<TcpEndpoint>().is_err());
    }
}
