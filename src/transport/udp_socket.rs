//! UDP transport.
//!
//! Datagram endpoints carry exactly one frame per datagram. A server binds
//! and receives from any peer; a client connects the socket to fix the
//! destination. Multipart chains are sent one part per datagram, so only
//! per-part ordering applies to UDP-backed patterns.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use socket2::SockRef;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{frame, EndpointUrl, SocketOptions};

fn resolve(url: &EndpointUrl) -> Result<SocketAddr> {
    let port = url
        .port
        .ok_or_else(|| Error::argument("udp endpoint requires a port"))?;
    (url.address.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| Error::resource("resolve udp address", e))?
        .next()
        .ok_or_else(|| Error::Resource(format!("udp address '{}' did not resolve", url.address)))
}

fn tune(socket: &UdpSocket, options: &SocketOptions) -> io::Result<()> {
    let sock = SockRef::from(socket);
    sock.set_recv_buffer_size(options.recv_buffer_size)?;
    sock.set_send_buffer_size(options.send_buffer_size)?;
    socket.set_write_timeout(options.send_timeout)?;
    Ok(())
}

/// Datagram endpoint socket shared by server and client roles.
pub(crate) struct UdpEndpointSocket {
    socket: UdpSocket,
    /// Fixed destination for the client role; servers reply-to-last is not
    /// supported, UDP endpoints are one-directional per role.
    peer: Option<SocketAddr>,
    max_frame_size: usize,
}

impl UdpEndpointSocket {
    /// Server role: bind the address and receive from any peer.
    pub fn bind(url: &EndpointUrl, options: &SocketOptions) -> Result<Self> {
        let addr = resolve(url)?;
        let socket = UdpSocket::bind(addr)
            .map_err(|e| Error::resource(&format!("bind {url}"), e))?;
        tune(&socket, options).map_err(|e| Error::resource("tune udp socket", e))?;
        debug!("udp socket bound on {url}");
        Ok(UdpEndpointSocket {
            socket,
            peer: None,
            max_frame_size: options.max_frame_size,
        })
    }

    /// Client role: bind an ephemeral port and fix the destination.
    pub fn connect(url: &EndpointUrl, options: &SocketOptions) -> Result<Self> {
        let addr = resolve(url)?;
        let bind_any: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("ipv4 wildcard")
        } else {
            "[::]:0".parse().expect("ipv6 wildcard")
        };
        let socket = UdpSocket::bind(bind_any)
            .map_err(|e| Error::resource("bind udp client socket", e))?;
        socket
            .connect(addr)
            .map_err(|e| Error::resource(&format!("connect {url}"), e))?;
        tune(&socket, options).map_err(|e| Error::resource("tune udp socket", e))?;
        debug!("udp client connected to {url}");
        Ok(UdpEndpointSocket {
            socket,
            peer: Some(addr),
            max_frame_size: options.max_frame_size,
        })
    }

    /// Send every part of the chain, one datagram per part.
    pub fn send_message(&self, msg: &Message) -> io::Result<()> {
        let mut cursor = Some(msg);
        while let Some(part) = cursor {
            let datagram = frame::encode(part);
            if datagram.len() - 8 > self.max_frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds the datagram limit", datagram.len()),
                ));
            }
            match self.peer {
                Some(_) => self.socket.send(&datagram)?,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "udp server endpoints are receive-only",
                    ))
                }
            };
            cursor = part.next_part();
        }
        Ok(())
    }

    /// Receive one datagram and decode its frame.
    pub fn recv_message(&self) -> io::Result<Message> {
        // 64 KiB covers the largest UDP payload.
        let mut buf = vec![0u8; 65536];
        let received = self.socket.recv(&mut buf)?;
        frame::decode_datagram(&buf[..received], self.max_frame_size)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub fn label(&self) -> String {
        match self.peer {
            Some(peer) => format!("udp://{peer}"),
            None => self
                .socket
                .local_addr()
                .map(|addr| format!("udp://{addr}"))
                .unwrap_or_else(|_| "udp endpoint".to_string()),
        }
    }
}
