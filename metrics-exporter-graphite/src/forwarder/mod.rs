use std::{
    collections::HashSet,
    fmt, io,
    net::{SocketAddr, TcpStream, ToSocketAddrs as _},
    time::Duration,
};

use thiserror::Error;

use crate::{key::KeyPath, snapshot::SnapshotError};

pub mod sync;

/// Address of the remote Graphite server.
///
/// The host is resolved on every connection attempt, so DNS changes are picked up when the pusher reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RemoteAddr {
    host: String,
    port: u16,
}

impl RemoteAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        let (host, port) =
            addr.rsplit_once(':').ok_or_else(|| format!("missing port in '{addr}' (expected '<host>:<port>')"))?;

        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        if host.is_empty() {
            return Err(format!("missing host in '{addr}' (expected '<host>:<port>')"));
        }

        let port = port.parse::<u16>().map_err(|e| format!("invalid port '{port}': {e}"))?;

        Ok(RemoteAddr::new(host, port))
    }
}

/// Opens connections to the remote server.
pub(crate) trait Connector {
    type Connection: io::Write;

    /// Opens a new connection.
    fn connect(&self) -> io::Result<Self::Connection>;
}

/// Connects to the remote server over TCP.
pub(crate) struct TcpConnector {
    remote_addr: RemoteAddr,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpConnector {
    pub fn new(remote_addr: RemoteAddr, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self { remote_addr, connect_timeout, write_timeout }
    }

    fn connect_any(&self, addrs: &[SocketAddr]) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("'{}' did not resolve to any address", self.remote_addr))
        }))
    }
}

impl Connector for TcpConnector {
    type Connection = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let addrs =
            (self.remote_addr.host.as_str(), self.remote_addr.port).to_socket_addrs()?.collect::<Vec<_>>();

        let stream = self.connect_any(&addrs)?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Forwarder configuration.
pub(crate) struct ForwarderConfiguration {
    pub prefix: String,
    pub push_interval: Duration,
    pub whitelist: Option<HashSet<KeyPath>>,
}

/// Reasons a push cycle can fail.
#[derive(Debug, Error)]
pub(crate) enum PushError {
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to write payload: {0}")]
    Write(#[source] io::Error),

    #[error("failed to fetch metrics: {0}")]
    Snapshot(#[from] SnapshotError),
}
