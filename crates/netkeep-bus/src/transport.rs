//! Socket connections to the server.
//!
//! [`connect`] dials the configured endpoint with a bounded timeout and wraps
//! the result in a [`BusStream`], so that callers stay transport agnostic.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use netkeep_config::SocketEndpoint;

#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::error::BusError;

/// Upper bound on connection establishment.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Connected bus socket.
#[derive(Debug)]
pub enum BusStream {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl BusStream {
    /// Shuts down both halves of the connection.
    ///
    /// # Errors
    ///
    /// Propagates the operating system error.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }
}

impl Read for BusStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for BusStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

#[cfg(unix)]
impl AsFd for BusStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Tcp(stream) => stream.as_fd(),
            Self::Unix(stream) => stream.as_fd(),
        }
    }
}

/// Connects to the server endpoint.
///
/// # Errors
///
/// Returns [`BusError::Resolve`] when a TCP host does not resolve and
/// [`BusError::Connect`] when the connection cannot be established within
/// [`CONNECTION_TIMEOUT`].
pub fn connect(endpoint: &SocketEndpoint) -> Result<BusStream, BusError> {
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let endpoint_display = endpoint.to_string();
            let address = resolve_tcp_address(host, *port).map_err(|source| BusError::Resolve {
                endpoint: endpoint_display.clone(),
                source,
            })?;
            TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
                .map(BusStream::Tcp)
                .map_err(|source| BusError::Connect {
                    endpoint: endpoint_display,
                    source,
                })
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str()).map_err(|source| BusError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }

            #[cfg(not(unix))]
            {
                Err(BusError::Connect {
                    endpoint: endpoint.to_string(),
                    source: io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("unix sockets are unavailable for {path}"),
                    ),
                })
            }
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<BusStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream: UnixStream = socket.into();
    Ok(BusStream::Unix(stream))
}
