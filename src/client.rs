//! Blocking client: connects (retrying until the server is listening or a
//! total timeout elapses), then serializes every request/data/download/
//! updownload operation through an internal mutex so a `Client` can be
//! shared across threads without each caller managing its own socket.

use std::io;
use std::net::ToSocketAddrs;
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, Result};
use crate::packet::{reserved, ControlCode, Packet};
use crate::socket::Socket;

/// A client owning at most one connection at a time. All operations take
/// `&self` and lock an internal mutex, so a single `Client` can safely be
/// shared (e.g. via `Arc`) across threads that each want to issue requests;
/// they will queue rather than interleave.
///
/// The socket is held as `Option` so [`Client::close`] can release it while
/// leaving the `Client` value itself alive: [`Client::reconnect`] can
/// re-establish a connection on the same instance afterwards.
pub struct Client {
    socket: Mutex<Option<Socket>>,
    config: ClientConfig,
}

fn interpret_ack(ack: &Packet) -> Result<()> {
    match ack.control_code {
        reserved::ACCEPT => Ok(()),
        reserved::REJECT => Err(ErrorKind::Reject("server rejected request".into())),
        reserved::FAILED => Err(ErrorKind::Failure("server reported failure".into())),
        other => Err(ErrorKind::Invariant(format!(
            "unexpected acknowledgement code {other:#x}"
        ))),
    }
}

/// One connection attempt: a TCP connect bounded by `config.connect_timeout`.
/// No packet is exchanged here — per the wire protocol (spec §4.5), the
/// first packet on a freshly accepted connection is the client's own first
/// Request/Data/Download/UpDownload packet, not a handshake.
fn establish_connection<A: ToSocketAddrs>(addr: A, config: &ClientConfig) -> Result<Socket> {
    let socket = Socket::connect(addr, config.connect_timeout)?;
    // Bound every subsequent read by the same budget used for the initial
    // connect, so a server that never replies surfaces as an error instead
    // of hanging forever.
    socket.set_read_timeout(Some(config.connect_timeout))?;
    Ok(socket)
}

/// Retry [`establish_connection`] until it succeeds or the configured retry
/// budget is exhausted, sleeping `config.retry_interval` between attempts —
/// the same "loop attempting establish_connection until success or total
/// timeout" policy the reference client's `connect` uses, so a client
/// started just before its server starts listening still succeeds.
fn retry_connect<A: ToSocketAddrs + Clone>(addr: A, config: &ClientConfig) -> Result<Socket> {
    let budget = config.retry_count_budget();
    for attempt in 0..budget {
        match establish_connection(addr.clone(), config) {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                debug!("connect attempt {attempt} failed: {e}");
                thread::sleep(config.retry_interval);
            }
        }
    }
    warn!("connect retry budget of {budget} attempts exhausted");
    Err(ErrorKind::Socket(io::Error::new(
        io::ErrorKind::TimedOut,
        "Connection time out",
    )))
}

impl Client {
    /// Connect to `addr`, applying the framework's socket tuning, retrying
    /// until the connection and handshake succeed or the configured retry
    /// budget (`retry_timeout` / `retry_interval`) is exhausted.
    pub fn connect<A: ToSocketAddrs + Clone>(addr: A, config: ClientConfig) -> Result<Client> {
        crate::logging::init();
        let socket = retry_connect(addr, &config)?;
        Ok(Client {
            socket: Mutex::new(Some(socket)),
            config,
        })
    }

    /// Close the underlying socket, if any is open. Idempotent: calling this
    /// on an already-closed client is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.socket.lock().unwrap();
        if let Some(socket) = guard.take() {
            socket.shutdown()?;
        }
        Ok(())
    }

    /// Re-establish a connection on this same `Client` instance, e.g. after
    /// [`Client::close`]. Uses the same retrying connect policy as
    /// [`Client::connect`] and the client's existing configuration. Replaces
    /// any socket already held (closing it first).
    pub fn reconnect<A: ToSocketAddrs + Clone>(&self, addr: A) -> Result<()> {
        crate::logging::init();
        let socket = retry_connect(addr, &self.config)?;
        let mut guard = self.socket.lock().unwrap();
        if let Some(old) = guard.take() {
            let _ = old.shutdown();
        }
        *guard = Some(socket);
        Ok(())
    }

    /// Run `f` against the connected socket, holding the client's internal
    /// lock for the duration so a multi-step exchange (e.g. send then
    /// receive an ack) is never interleaved with another caller's operation.
    /// Fails with [`ErrorKind::InvalidParam`] if the client is currently
    /// closed.
    fn with_socket<T>(&self, f: impl FnOnce(&mut Socket) -> Result<T>) -> Result<T> {
        let mut guard = self.socket.lock().unwrap();
        let socket = guard.as_mut().ok_or_else(|| {
            ErrorKind::InvalidParam("client is not connected; call connect/reconnect first".into())
        })?;
        f(socket)
    }

    /// Send a Request-shaped control code with no payload; returns once the
    /// server acknowledges it.
    pub fn send_request(&self, code: ControlCode) -> Result<()> {
        self.with_socket(|socket| {
            socket.send_packet(&Packet::new(code))?;
            interpret_ack(&socket.recv_packet()?)
        })
    }

    /// Send a Data-shaped control code with `data` as its payload; returns
    /// once the server acknowledges it.
    pub fn send_data(&self, code: ControlCode, data: &[u8]) -> Result<()> {
        self.with_socket(|socket| {
            socket.send_buffer(code, data)?;
            interpret_ack(&socket.recv_packet()?)
        })
    }

    /// Request a Download-shaped control code with no payload; returns the
    /// bytes the server sent back, after an acknowledgement.
    ///
    /// If the handler rejected the request, the server never sends a data
    /// packet at all — instead the ack arrives where a data header would
    /// have been expected. That intermediate `Reject`/`Failed` code is
    /// recognized here and surfaced the same way a trailing ack would be.
    pub fn recv_data(&self, code: ControlCode) -> Result<Vec<u8>> {
        self.with_socket(|socket| {
            socket.send_packet(&Packet::new(code))?;
            let header = socket.recv_packet()?;
            if let reserved::REJECT | reserved::FAILED = header.control_code {
                return interpret_ack(&header);
            }
            let data = socket.recv_payload(header.data_size() as usize)?;
            interpret_ack(&socket.recv_packet()?)?;
            Ok(data)
        })
    }

    /// Send an UpDownload-shaped control code with `data` as its payload;
    /// returns the bytes the server sent back, after an acknowledgement.
    /// Same intermediate-reject handling as [`Client::recv_data`].
    pub fn send_recv_data(&self, code: ControlCode, data: &[u8]) -> Result<Vec<u8>> {
        self.with_socket(|socket| {
            socket.send_buffer(code, data)?;
            let header = socket.recv_packet()?;
            if let reserved::REJECT | reserved::FAILED = header.control_code {
                return interpret_ack(&header);
            }
            let result = socket.recv_payload(header.data_size() as usize)?;
            interpret_ack(&socket.recv_packet()?)?;
            Ok(result)
        })
    }

    /// Tell the server this client is disconnecting voluntarily, then close
    /// the socket. A no-op if the client is already closed.
    pub fn send_exit(&self) -> Result<()> {
        let mut guard = self.socket.lock().unwrap();
        let Some(socket) = guard.as_mut() else {
            return Ok(());
        };
        socket.send_packet(&Packet::new(reserved::EXIT))?;
        let socket = guard.take().expect("checked Some above");
        socket.shutdown()
    }

    /// Retry `op` until it succeeds or stops being retriable, sleeping
    /// `retry_interval` between attempts, for up to `retry_count_budget`
    /// attempts. Only [`ErrorKind::Reject`] is retried; any other error
    /// propagates immediately, matching [`ErrorKind::is_retriable`].
    /// Exhausting the budget reports a [`ErrorKind::Socket`] timeout, the
    /// same kind a real transport timeout would surface as, rather than
    /// [`ErrorKind::Failure`] (which is reserved for a peer explicitly
    /// reporting `Failed`).
    fn retry<T>(&self, op_name: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let budget = self.config.retry_count_budget();
        for attempt in 0..budget {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retriable() => {
                    debug!("retriable error on attempt {attempt}: {e}");
                    thread::sleep(self.config.retry_interval);
                }
                Err(e) => return Err(e),
            }
        }
        warn!("retry budget of {budget} attempts exhausted for {op_name}");
        Err(ErrorKind::Socket(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{op_name} time out"),
        )))
    }

    /// [`Client::send_request`], retrying on `Reject` up to the client's
    /// configured retry budget before giving up.
    pub fn send_request_blocking(&self, code: ControlCode) -> Result<()> {
        self.retry("sending request", || self.send_request(code))
    }

    /// [`Client::send_data`], retrying on `Reject`.
    pub fn send_data_blocking(&self, code: ControlCode, data: &[u8]) -> Result<()> {
        self.retry("sending data", || self.send_data(code, data))
    }

    /// [`Client::recv_data`], retrying on `Reject`.
    pub fn recv_data_blocking(&self, code: ControlCode) -> Result<Vec<u8>> {
        self.retry("receiving data", || self.recv_data(code))
    }

    /// [`Client::send_recv_data`], retrying on `Reject`.
    pub fn send_recv_data_blocking(&self, code: ControlCode, data: &[u8]) -> Result<Vec<u8>> {
        self.retry("sending/receiving data", || self.send_recv_data(code, data))
    }
}
