//! TCP transport.
//!
//! Streams are tuned for messaging latency on creation: Nagle off,
//! keep-alive on, and send/receive buffers sized from [`SocketOptions`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use socket2::{Domain, SockRef, Socket, Type};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{EndpointUrl, SocketOptions, StreamListener, StreamSocket};

fn resolve(url: &EndpointUrl) -> Result<SocketAddr> {
    let port = url
        .port
        .ok_or_else(|| Error::argument("tcp endpoint requires a port"))?;
    (url.address.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| Error::resource("resolve tcp address", e))?
        .next()
        .ok_or_else(|| Error::Resource(format!("tcp address '{}' did not resolve", url.address)))
}

fn tune_stream(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(options.no_delay)?;
    sock.set_keepalive(options.keep_alive)?;
    sock.set_recv_buffer_size(options.recv_buffer_size)?;
    sock.set_send_buffer_size(options.send_buffer_size)?;
    stream.set_write_timeout(options.send_timeout)?;
    Ok(())
}

struct TcpStreamSocket {
    stream: TcpStream,
}

impl Read for TcpStreamSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpStreamSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl StreamSocket for TcpStreamSocket {
    fn try_clone_stream(&self) -> io::Result<Box<dyn StreamSocket>> {
        Ok(Box::new(TcpStreamSocket {
            stream: self.stream.try_clone()?,
        }))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }

    fn set_stream_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    fn peer_label(&self) -> String {
        self.stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp peer".to_string())
    }
}

struct TcpListenerSocket {
    listener: TcpListener,
    options: SocketOptions,
    label: String,
}

impl StreamListener for TcpListenerSocket {
    fn accept_stream(&self) -> io::Result<Box<dyn StreamSocket>> {
        let (stream, peer) = self.listener.accept()?;
        tune_stream(&stream, &self.options)?;
        debug!("accepted tcp connection from {peer} on {}", self.label);
        Ok(Box::new(TcpStreamSocket { stream }))
    }

    fn set_listener_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    fn local_label(&self) -> String {
        self.label.clone()
    }
}

/// Bind a listening socket with `reuse_addr` applied before the bind.
pub(crate) fn listen(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamListener>> {
    let addr = resolve(url)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)
        .map_err(|e| Error::resource("create tcp socket", e))?;
    socket
        .set_reuse_address(options.reuse_addr)
        .map_err(|e| Error::resource("set tcp reuse_addr", e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| Error::resource(&format!("bind {url}"), e))?;
    socket
        .listen(options.backlog)
        .map_err(|e| Error::resource(&format!("listen {url}"), e))?;

    let listener: TcpListener = socket.into();
    debug!("tcp listener bound on {url}");
    Ok(Box::new(TcpListenerSocket {
        listener,
        options: options.clone(),
        label: url.to_string(),
    }))
}

/// Connect and tune a client stream.
pub(crate) fn connect(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamSocket>> {
    let addr = resolve(url)?;
    let stream = TcpStream::connect(addr)
        .map_err(|e| Error::resource(&format!("connect {url}"), e))?;
    tune_stream(&stream, options).map_err(|e| Error::resource("tune tcp stream", e))?;
    debug!("tcp client connected to {url}");
    Ok(Box::new(TcpStreamSocket { stream }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame;
    use crate::message::Message;
    use std::thread;

    #[test]
    fn round_trip_over_loopback() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = std_listener.local_addr().unwrap().port();
        drop(std_listener);

        let url = EndpointUrl::parse(&format!("tcp://127.0.0.1:{port}")).unwrap();
        let options = SocketOptions::default();
        let listener = listen(&url, &options).unwrap();

        let client_url = url.clone();
        let sender = thread::spawn(move || {
            let mut stream = connect(&client_url, &SocketOptions::default()).unwrap();
            let mut writer = crate::transport::StreamWriter(&mut *stream);
            frame::write_chain(&mut writer, &Message::with_body(b"ping".to_vec())).unwrap();
        });

        let mut accepted = listener.accept_stream().unwrap();
        let mut reader = crate::transport::StreamReader(&mut *accepted);
        let msg = frame::read_chain(&mut reader, 1024).unwrap();
        assert_eq!(msg.payload(), b"ping");
        sender.join().unwrap();
    }
}
