//! Blocking TCP transport: a tuned [`Socket`] wrapping `std::net::TcpStream`,
//! and a [`ListenSocket`] for accepting new connections.
//!
//! The socket tuning (`TCP_NODELAY`, send/receive buffer sizes, keepalive)
//! mirrors what `TcpSocketTransport` applies in the crate this one started
//! from, via the same `socket2` crate, minus the async runtime: every
//! operation here blocks the calling thread.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::error::{ErrorKind, Result};
use crate::packet::{Packet, PACKET_SIZE};

/// Receive/send buffer size applied to every socket this crate opens.
pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// TCP keepalive idle time before the first probe is sent.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
/// Interval between subsequent keepalive probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// Number of unacknowledged probes before the connection is considered dead.
pub const KEEPALIVE_COUNT: u32 = 10;

fn tune(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    sock.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_COUNT);
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// A connected, tuned TCP endpoint used for both the server's per-connection
/// sockets and the client's socket.
pub struct Socket {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Socket {
    /// Connect to `addr`, applying the framework's socket tuning once
    /// connected. Blocks until the connection completes or `timeout`
    /// elapses.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Socket> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ErrorKind::InvalidParam("no address to connect to".into()))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        tune(&stream)?;
        let peer = stream.peer_addr()?;
        Ok(Socket { stream, peer })
    }

    fn from_stream(stream: TcpStream) -> Result<Socket> {
        tune(&stream)?;
        let peer = stream.peer_addr()?;
        Ok(Socket { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Bound how long a subsequent `recv_packet`/`recv_buffer` call may
    /// block waiting for data. `None` waits indefinitely (the server's
    /// default: a connection worker should block on its next packet).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a single fixed-size packet, retrying on short writes the way the
    /// reference socket's write loop does (a single `write_all` already
    /// handles that for us, but we keep the explicit method so callers never
    /// reach for `std::io::Write` directly on a tuned socket).
    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.stream.write_all(&packet.to_bytes())?;
        Ok(())
    }

    /// Receive a single fixed-size packet. A clean peer shutdown while no
    /// bytes have yet been read is reported as
    /// [`ErrorKind::Socket`]/`UnexpectedEof`, matching the reference
    /// behavior of treating a zero-byte read as a connection error rather
    /// than a valid empty packet.
    pub fn recv_packet(&mut self) -> Result<Packet> {
        let mut buf = [0u8; PACKET_SIZE];
        self.stream.read_exact(&mut buf)?;
        Ok(Packet::from_bytes(&buf))
    }

    /// Send a Data/UpDownload packet header declaring `data.len()` as its
    /// size, immediately followed by `data` itself as a separate byte run
    /// (not embedded in the packet's fixed-size body). The peer's
    /// `recv_packet` followed by `recv_payload(size)` reads exactly these
    /// bytes back.
    pub fn send_buffer(&mut self, control_code: u64, data: &[u8]) -> Result<()> {
        let packet = Packet::new_data(control_code, data.len() as u64)?;
        self.send_packet(&packet)?;
        if !data.is_empty() {
            self.stream.write_all(data)?;
        }
        Ok(())
    }

    /// Read exactly `size` raw bytes following a Data/UpDownload packet
    /// header. A premature close partway through is reported as a
    /// [`ErrorKind::Socket`] error, never as a short, silently-truncated
    /// buffer.
    pub fn recv_payload(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        if size > 0 {
            self.stream.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    /// Receive a Data/UpDownload packet header and its trailing payload in
    /// one call.
    pub fn recv_buffer(&mut self) -> Result<Vec<u8>> {
        let packet = self.recv_packet()?;
        self.recv_payload(packet.data_size() as usize)
    }

    /// Shut down both halves of the connection. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        match self.stream.shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn try_clone(&self) -> Result<Socket> {
        Ok(Socket {
            stream: self.stream.try_clone()?,
            peer: self.peer,
        })
    }
}

/// A bound, listening socket used by [`crate::server::Server`] to accept new
/// connections.
pub struct ListenSocket {
    listener: TcpListener,
}

impl ListenSocket {
    /// Bind and start listening on `addr`, with `SO_REUSEADDR` set so a
    /// restarted server does not have to wait out `TIME_WAIT`.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<ListenSocket> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ErrorKind::InvalidParam("no address to bind to".into()))?;
        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let sock = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(128)?;
        sock.set_nonblocking(true)?;
        Ok(ListenSocket {
            listener: sock.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept a connection if one is pending, without blocking. Returns
    /// `Ok(None)` if none is pending, so the server's accept loop can poll at
    /// its configured interval and still notice a stop request promptly.
    pub fn try_accept(&self) -> Result<Option<Socket>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(Socket::from_stream(stream)?))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
