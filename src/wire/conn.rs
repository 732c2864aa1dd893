//! Non-blocking framed TCP connections.
//!
//! Every socket is owned by exactly one component and driven from that
//! component's loop: reads are `try_recv` (never block), writes retry on a
//! short park up to a stall deadline. Partial frames accumulate in a per-
//! connection buffer so a slow peer never desynchronises the stream.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::wire::frame::Frame;
use crate::{Error, Result};

/// How long a write may sit in `WouldBlock` before the peer counts as stalled.
const SEND_STALL: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 64 * 1024;

/// Short cooperative pause between poll attempts.
pub fn park() {
    std::thread::sleep(Duration::from_millis(1));
}

/// Resolve a `tcp://host:port` url (scheme optional) to a socket address.
pub fn parse_url(url: &str) -> Result<SocketAddr> {
    let addr = url.strip_prefix("tcp://").unwrap_or(url);
    addr.to_socket_addrs()
        .map_err(|_| Error::InvalidUrl(url.to_string()))?
        .next()
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))
}

/// One framed, non-blocking TCP connection.
pub struct FramedConn {
    stream: TcpStream,
    rx: Vec<u8>,
}

impl FramedConn {
    pub fn connect(url: &str) -> Result<Self> {
        let addr = parse_url(url)?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2))?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, rx: Vec::new() })
    }

    /// Pull one frame if a complete one is available, without blocking.
    ///
    /// `Ok(None)` means no complete frame yet. `Err(Disconnected)` means the
    /// peer closed; codec errors bubble up so the caller can drop the peer.
    pub fn try_recv(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some((frame, used)) = Frame::decode(&self.rx)? {
                self.rx.drain(..used);
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Write a whole frame, parking on `WouldBlock` up to the stall deadline.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut written = 0;
        let deadline = Instant::now() + SEND_STALL;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => written += n,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::SendStalled);
                    }
                    park();
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

/// Non-blocking accept side of a bound url.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind fails are fatal at component startup, so this propagates.
    pub fn bind(url: &str) -> Result<Self> {
        let addr = parse_url(url)?;
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    /// Drain all connections currently waiting in the accept queue.
    pub fn accept_new(&mut self) -> Vec<FramedConn> {
        let mut conns = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => match FramedConn::from_stream(stream) {
                    Ok(conn) => conns.push(conn),
                    Err(err) => log::warn!("dropping fresh peer: {err}"),
                },
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("accept failed: {err}");
                    break;
                }
            }
        }
        conns
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}
