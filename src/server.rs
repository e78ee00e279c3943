//! The listening server: an accept loop that hands each connection to its
//! own worker thread, which drives that connection's receive -> dispatch ->
//! acknowledge loop until the peer disconnects or sends the reserved `Exit`
//! code.

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorKind, Result};
use crate::packet::{reserved, Group, Packet};
use crate::registry::{ConnectionId, HandlerRegistry};
use crate::socket::{ListenSocket, Socket};
use crate::state::StateContext;

/// Constructs the initial [`StateContext`] for a newly accepted connection.
pub type StateFactory = Arc<dyn Fn() -> StateContext + Send + Sync>;

/// A failure recorded by a connection worker or the accept loop, surfaced to
/// the caller by [`Server::wait`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerFailure {
    #[error("connection {0} worker failed: {1}")]
    Connection(ConnectionId, ErrorKind),
    #[error("accept loop failed: {0}")]
    Accept(ErrorKind),
}

/// What one `try_accept` outcome tells the accept loop to do next.
///
/// `try_accept` can only fail with a transport-level [`ErrorKind::Socket`]
/// error (a transient `EMFILE`/`ENFILE` and the like); per spec §4.6/§7 that
/// is always retried rather than stopping the accept loop, so `Err` maps to
/// the same "wait and try again" step as "nothing pending yet".
enum AcceptStep<T> {
    /// A connection was accepted; spawn a worker for it.
    Spawn(T),
    /// Nothing pending, or a transient accept error — sleep and retry.
    Retry,
}

fn classify_accept_outcome<T>(result: Result<Option<T>>) -> AcceptStep<T> {
    match result {
        Ok(Some(socket)) => AcceptStep::Spawn(socket),
        Ok(None) => AcceptStep::Retry,
        Err(_) => AcceptStep::Retry,
    }
}

/// A multi-connection TCP server dispatching packets through a
/// [`HandlerRegistry`].
pub struct Server<C: Clone + Send + Sync + 'static> {
    listener: Arc<ListenSocket>,
    registry: Arc<HandlerRegistry<C>>,
    state_factory: StateFactory,
    config: ServerConfig,
    stop_flag: Arc<AtomicBool>,
    next_connection_id: Arc<AtomicU64>,
    accept_handle: Option<JoinHandle<Result<()>>>,
    worker_handles: Arc<Mutex<Vec<JoinHandle<std::result::Result<(), WorkerFailure>>>>>,
    failures: Arc<Mutex<Vec<WorkerFailure>>>,
}

impl<C: Clone + Send + Sync + 'static> Server<C> {
    /// Bind `addr` and prepare a server. Call [`Server::start`] to begin
    /// accepting connections.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        registry: HandlerRegistry<C>,
        state_factory: StateFactory,
        config: ServerConfig,
    ) -> Result<Server<C>> {
        crate::logging::init();
        let listener = ListenSocket::bind(addr)?;
        Ok(Server {
            listener: Arc::new(listener),
            registry: Arc::new(registry),
            state_factory,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            next_connection_id: Arc::new(AtomicU64::new(1)),
            accept_handle: None,
            worker_handles: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Start accepting connections on a background thread. Returns
    /// immediately; call [`Server::wait`] to block until the server stops.
    pub fn start(&mut self) {
        let listener = Arc::clone(&self.listener);
        let registry = Arc::clone(&self.registry);
        let state_factory = Arc::clone(&self.state_factory);
        let stop_flag = Arc::clone(&self.stop_flag);
        let next_connection_id = Arc::clone(&self.next_connection_id);
        let worker_handles = Arc::clone(&self.worker_handles);
        let poll_interval = self.config.accept_poll_interval;

        self.accept_handle = Some(thread::spawn(move || {
            info!("accept loop started");
            while !stop_flag.load(Ordering::SeqCst) {
                let outcome = listener.try_accept();
                if let Err(e) = &outcome {
                    warn!("accept failed, retrying: {e}");
                }
                match classify_accept_outcome(outcome) {
                    AcceptStep::Spawn(socket) => {
                        let connection_id = next_connection_id.fetch_add(1, Ordering::SeqCst);
                        let registry = Arc::clone(&registry);
                        let state_factory = Arc::clone(&state_factory);
                        let handle = thread::spawn(move || {
                            run_connection(connection_id, socket, registry, state_factory)
                                .map_err(|e| WorkerFailure::Connection(connection_id, e))
                        });
                        worker_handles.lock().unwrap().push(handle);
                    }
                    AcceptStep::Retry => thread::sleep(poll_interval),
                }
            }
            info!("accept loop stopped");
            Ok(())
        }));
    }

    /// Request the accept loop to stop. Already-accepted connections keep
    /// running until their peers disconnect or send `Exit`; this only stops
    /// new connections from being accepted.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Block until the accept loop and every connection worker it spawned
    /// have finished, returning the first recorded failure if any.
    pub fn wait(mut self) -> std::result::Result<(), WorkerFailure> {
        if let Some(handle) = self.accept_handle.take() {
            if let Err(e) = handle.join().expect("accept thread panicked") {
                self.failures.lock().unwrap().push(WorkerFailure::Accept(e));
            }
        }
        let handles = std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.failures.lock().unwrap().push(e),
                Err(_) => warn!("a connection worker thread panicked"),
            }
        }
        let mut failures = self.failures.lock().unwrap();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

fn send_ack(socket: &mut Socket, code: u64) -> Result<()> {
    socket.send_packet(&Packet::new(code))
}

fn run_connection<C: Clone + Send + Sync + 'static>(
    connection_id: ConnectionId,
    mut socket: Socket,
    registry: Arc<HandlerRegistry<C>>,
    state_factory: StateFactory,
) -> Result<()> {
    debug!("connection {connection_id} from {}", socket.peer_addr());

    let mut state = state_factory();

    let result = (|| -> Result<()> {
        loop {
            let packet = match socket.recv_packet() {
                Ok(p) => p,
                Err(ErrorKind::Socket(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("connection {connection_id} closed by peer");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if packet.control_code == reserved::EXIT {
                debug!("connection {connection_id} received Exit");
                return Ok(());
            }

            let payload = match Group::classify(packet.control_code) {
                Some(Group::Data) | Some(Group::UpDownload) => {
                    socket.recv_payload(packet.data_size() as usize)?
                }
                _ => Vec::new(),
            };

            match registry.dispatch(
                connection_id,
                packet.control_code,
                &payload,
                &mut socket,
                &mut state,
            ) {
                Ok(()) => {
                    send_ack(&mut socket, reserved::ACCEPT)?;
                }
                Err(ErrorKind::Callback(msg)) => {
                    warn!("connection {connection_id} callback rejected: {msg}");
                    send_ack(&mut socket, reserved::REJECT)?;
                }
                Err(e) => {
                    error!("connection {connection_id} handler failed: {e}");
                    return Err(e);
                }
            }
        }
    })();

    registry.forget_connection(connection_id);
    let _ = socket.shutdown();
    result
}
