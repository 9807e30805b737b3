//! Transport abstraction over the socket-based protocols.
//!
//! Every distributed endpoint speaks one of the protocols declared here.
//! Stream transports (TCP, Unix domain sockets) expose a uniform
//! listener/stream surface so the endpoint layer can run the same accept
//! and reader loops over either; the datagram transport (UDP) maps one
//! frame to one datagram. PGM/EPGM and VMCI are declared protocol slots
//! whose bind/connect surface `NotImplemented` without disturbing the rest
//! of the API.
//!
//! ## Endpoint URL grammar
//!
//! `<proto>://<address>[:<port>]` — for `inproc://` and `ipc://` the
//! remainder is an opaque identifier or filesystem path and no port is
//! accepted; every other protocol requires a decimal port in [0, 65535].

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

pub mod frame;
pub mod multicast;
pub mod tcp_socket;
pub mod udp_socket;
pub mod unix_domain_socket;

/// Transport protocol tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    /// In-process queue sharing through the endpoint registry.
    Inproc,
    /// Unix domain sockets.
    Ipc,
    Tcp,
    Udp,
    /// Reliable multicast, declared but not implemented.
    Pgm,
    /// Encapsulated PGM, declared but not implemented.
    Epgm,
    /// VMware VMCI sockets, declared but not implemented.
    Vmci,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Inproc => "inproc",
            Protocol::Ipc => "ipc",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Pgm => "pgm",
            Protocol::Epgm => "epgm",
            Protocol::Vmci => "vmci",
        }
    }

    pub fn from_scheme(scheme: &str) -> Result<Self> {
        Ok(match scheme {
            "inproc" => Protocol::Inproc,
            "ipc" => Protocol::Ipc,
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "pgm" => Protocol::Pgm,
            "epgm" => Protocol::Epgm,
            "vmci" => Protocol::Vmci,
            other => {
                return Err(Error::argument(format!(
                    "unknown transport scheme '{other}'"
                )))
            }
        })
    }

    /// Whether the URL form carries a `:<port>` suffix.
    pub fn requires_port(self) -> bool {
        !matches!(self, Protocol::Inproc | Protocol::Ipc)
    }

    /// Connection-oriented protocols support `listen`/`accept`.
    pub fn is_connection_oriented(self) -> bool {
        matches!(self, Protocol::Ipc | Protocol::Tcp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Server or client side of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Accepts connections and owns bound resources.
    Server,
    /// Connects to a server and borrows its resources.
    Client,
}

/// Connection lifecycle of a transport attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Initializing,
    Connected,
    Disconnected,
    Error,
}

/// Parsed endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    pub protocol: Protocol,
    pub address: String,
    pub port: Option<u16>,
}

impl EndpointUrl {
    /// Parse `<proto>://<address>[:<port>]`.
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::argument(format!("endpoint URL '{url}' is missing '://'")))?;
        let protocol = Protocol::from_scheme(scheme)?;

        if rest.is_empty() {
            return Err(Error::argument(format!(
                "endpoint URL '{url}' has an empty address"
            )));
        }

        if !protocol.requires_port() {
            // inproc/ipc: the remainder is an opaque identifier or path.
            return Ok(EndpointUrl {
                protocol,
                address: rest.to_string(),
                port: None,
            });
        }

        let (address, port_text) = rest.rsplit_once(':').ok_or_else(|| {
            Error::argument(format!("endpoint URL '{url}' is missing a port"))
        })?;
        if address.is_empty() {
            return Err(Error::argument(format!(
                "endpoint URL '{url}' has an empty address"
            )));
        }
        let port: u16 = port_text.parse().map_err(|_| {
            Error::argument(format!("endpoint URL '{url}' has an invalid port"))
        })?;

        Ok(EndpointUrl {
            protocol,
            address: address.to_string(),
            port: Some(port),
        })
    }

    pub(crate) fn from_parts(protocol: Protocol, address: &str, port: Option<u16>) -> Result<Self> {
        if protocol.requires_port() && port.is_none() {
            return Err(Error::argument(format!(
                "protocol {protocol} requires a port"
            )));
        }
        if address.is_empty() {
            return Err(Error::argument("endpoint address must not be empty"));
        }
        Ok(EndpointUrl {
            protocol,
            address: address.to_string(),
            port: if protocol.requires_port() { port } else { None },
        })
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.protocol, self.address, port),
            None => write!(f, "{}://{}", self.protocol, self.address),
        }
    }
}

/// Socket tuning applied to every stream transport.
///
/// Defaults mirror the suite-wide conventions: 8 KiB socket buffers and a
/// small accept backlog.
#[derive(Debug, Clone, Serialize)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub keep_alive: bool,
    /// TCP only; ignored by other protocols.
    pub no_delay: bool,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    #[serde(skip)]
    pub send_timeout: Option<Duration>,
    #[serde(skip)]
    pub recv_timeout: Option<Duration>,
    pub backlog: i32,
    /// Frames above this size are rejected as transport errors.
    pub max_frame_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            reuse_addr: true,
            keep_alive: true,
            no_delay: true,
            send_buffer_size: crate::defaults::BUFFER_SIZE,
            recv_buffer_size: crate::defaults::BUFFER_SIZE,
            send_timeout: None,
            recv_timeout: None,
            backlog: crate::defaults::ACCEPT_BACKLOG,
            max_frame_size: crate::defaults::MAX_FRAME_SIZE,
        }
    }
}

/// Uniform surface over connected stream sockets (TCP, UDS).
pub(crate) trait StreamSocket: Read + Write + Send {
    /// Duplicate the handle so one side can read while another writes.
    fn try_clone_stream(&self) -> io::Result<Box<dyn StreamSocket>>;

    /// Shut down both directions, waking any blocked reader.
    fn shutdown_stream(&self) -> io::Result<()>;

    /// Some platforms hand accepted sockets the listener's non-blocking
    /// flag; readers need a blocking stream.
    fn set_stream_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Human-readable peer description for logging.
    fn peer_label(&self) -> String;
}

/// `Read` view of a stream trait object. Supertrait methods are callable
/// on the object, but the object type itself cannot stand in for
/// `dyn Read` on this crate's MSRV, so the frame codec goes through this
/// shim.
pub(crate) struct StreamReader<'a>(pub &'a mut dyn StreamSocket);

impl Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// `Write` view of a stream trait object.
pub(crate) struct StreamWriter<'a>(pub &'a mut dyn StreamSocket);

impl Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Uniform surface over listening stream sockets.
pub(crate) trait StreamListener: Send + Sync {
    fn accept_stream(&self) -> io::Result<Box<dyn StreamSocket>>;

    /// Accept loops run the listener non-blocking and poll for shutdown.
    fn set_listener_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn local_label(&self) -> String;
}

/// Open a listener for a connection-oriented protocol.
pub(crate) fn bind_listener(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamListener>> {
    match url.protocol {
        Protocol::Tcp => tcp_socket::listen(url, options),
        Protocol::Ipc => unix_domain_socket::listen(url, options),
        Protocol::Pgm | Protocol::Epgm | Protocol::Vmci => {
            Err(multicast::not_implemented(url.protocol))
        }
        other => Err(Error::argument(format!(
            "protocol {other} is not connection-oriented"
        ))),
    }
}

/// Connect a stream to a server for a connection-oriented protocol.
pub(crate) fn connect_stream(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamSocket>> {
    match url.protocol {
        Protocol::Tcp => tcp_socket::connect(url, options),
        Protocol::Ipc => unix_domain_socket::connect(url, options),
        Protocol::Pgm | Protocol::Epgm | Protocol::Vmci => {
            Err(multicast::not_implemented(url.protocol))
        }
        other => Err(Error::argument(format!(
            "protocol {other} is not connection-oriented"
        ))),
    }
}
