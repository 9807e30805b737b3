//! Unix domain socket transport.
//!
//! The server side owns the socket path: a stale file is unlinked before
//! bind, and the path is removed again when the listener goes away. The
//! socket file is the only filesystem artifact the messaging core creates.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use socket2::SockRef;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{EndpointUrl, SocketOptions, StreamListener, StreamSocket};

fn tune_stream(stream: &UnixStream, options: &SocketOptions) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_recv_buffer_size(options.recv_buffer_size)?;
    sock.set_send_buffer_size(options.send_buffer_size)?;
    stream.set_write_timeout(options.send_timeout)?;
    Ok(())
}

struct UnixStreamSocket {
    stream: UnixStream,
    label: String,
}

impl Read for UnixStreamSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for UnixStreamSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl StreamSocket for UnixStreamSocket {
    fn try_clone_stream(&self) -> io::Result<Box<dyn StreamSocket>> {
        Ok(Box::new(UnixStreamSocket {
            stream: self.stream.try_clone()?,
            label: self.label.clone(),
        }))
    }

    fn shutdown_stream(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }

    fn set_stream_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)
    }

    fn peer_label(&self) -> String {
        self.label.clone()
    }
}

struct UnixListenerSocket {
    listener: UnixListener,
    options: SocketOptions,
    path: PathBuf,
}

impl StreamListener for UnixListenerSocket {
    fn accept_stream(&self) -> io::Result<Box<dyn StreamSocket>> {
        let (stream, _) = self.listener.accept()?;
        tune_stream(&stream, &self.options)?;
        debug!("accepted ipc connection on {}", self.path.display());
        Ok(Box::new(UnixStreamSocket {
            stream,
            label: self.path.display().to_string(),
        }))
    }

    fn set_listener_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    fn local_label(&self) -> String {
        format!("ipc://{}", self.path.display())
    }
}

impl Drop for UnixListenerSocket {
    fn drop(&mut self) {
        // Only the owning server unlinks the path.
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove socket file {}: {e}", self.path.display());
            }
        }
    }
}

/// Bind a listening socket, replacing any stale socket file at the path.
pub(crate) fn listen(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamListener>> {
    let path = PathBuf::from(&url.address);
    match std::fs::remove_file(&path) {
        Ok(()) => debug!("removed stale socket file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::resource(&format!("unlink {}", path.display()), e)),
    }

    let listener = UnixListener::bind(&path)
        .map_err(|e| Error::resource(&format!("bind {url}"), e))?;
    debug!("ipc listener bound on {}", path.display());
    Ok(Box::new(UnixListenerSocket {
        listener,
        options: options.clone(),
        path,
    }))
}

/// Connect and tune a client stream.
pub(crate) fn connect(
    url: &EndpointUrl,
    options: &SocketOptions,
) -> Result<Box<dyn StreamSocket>> {
    let path = PathBuf::from(&url.address);
    let stream = UnixStream::connect(&path)
        .map_err(|e| Error::resource(&format!("connect {url}"), e))?;
    tune_stream(&stream, options).map_err(|e| Error::resource("tune ipc stream", e))?;
    debug!("ipc client connected to {}", path.display());
    Ok(Box::new(UnixStreamSocket {
        stream,
        label: path.display().to_string(),
    }))
}
