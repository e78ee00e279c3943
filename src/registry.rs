//! Handler registry and dispatch: maps control codes to application
//! callbacks and runs the classify -> resolve-context -> invoke ->
//! acknowledge algorithm once per received packet.
//!
//! The shared context value `C` handlers receive is always exclusive
//! (`&mut C`) for the duration of one dispatch: the registry holds whatever
//! lock is needed (the single `AllConnections` value, or the one
//! `PerConnection` entry for the dispatching connection) around the handler
//! call, the way the reference framework hands callbacks a raw mutable
//! pointer into its `cdata` map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ErrorKind, Result};
use crate::packet::{ControlCode, Group};
use crate::socket::Socket;
use crate::state::StateContext;

/// Identifies one connection for the lifetime of the server process.
pub type ConnectionId = u64;

/// A Request handler: invoked for a control code with no payload. Receives
/// the state context so it can guard on / transition state.
pub type RequestHandler<C> =
    Arc<dyn Fn(ControlCode, &mut StateContext, &mut C) -> Result<()> + Send + Sync>;

/// A Data handler: invoked with the payload the client sent; replies with an
/// acknowledgement only.
pub type DataHandler<C> =
    Arc<dyn Fn(ControlCode, &[u8], &mut StateContext, &mut C) -> Result<()> + Send + Sync>;

/// A Download handler: invoked with no input payload. Writes whatever it
/// wants to send back (one or more data packets, using `socket`'s own
/// framing helpers) directly to `socket` before returning; the dispatcher
/// only sends the trailing acknowledgement.
pub type DownloadHandler<C> =
    Arc<dyn Fn(ControlCode, &mut Socket, &mut StateContext, &mut C) -> Result<()> + Send + Sync>;

/// An UpDownload handler: invoked with the client's payload. Writes its own
/// response directly to `socket`, same as [`DownloadHandler`].
pub type UpDownloadHandler<C> = Arc<
    dyn Fn(ControlCode, &[u8], &mut Socket, &mut StateContext, &mut C) -> Result<()>
        + Send
        + Sync,
>;

enum Handler<C> {
    Request(RequestHandler<C>),
    Data(DataHandler<C>),
    Download(DownloadHandler<C>),
    UpDownload(UpDownloadHandler<C>),
}

/// Scope of the shared context value `C` that handlers receive alongside
/// per-connection state.
///
/// `AllConnections` hands every connection the same value, serialized by an
/// internal mutex. `PerConnection` clones a template value the first time a
/// given connection dispatches any packet; from then on that connection
/// exclusively owns its clone.
pub enum SharedContextScope<C> {
    AllConnections(C),
    PerConnection(C),
}

enum Storage<C> {
    AllConnections(Mutex<C>),
    PerConnection {
        template: C,
        by_connection: Mutex<HashMap<ConnectionId, C>>,
    },
}

/// Maps control codes to handlers and mediates dispatch for every connection
/// a [`crate::server::Server`] accepts.
///
/// `C` is the type of the shared context value handlers receive. Use `()`
/// if handlers need no shared state beyond the per-connection
/// [`StateContext`].
pub struct HandlerRegistry<C> {
    handlers: HashMap<ControlCode, Handler<C>>,
    storage: Storage<C>,
}

/// An exclusive handle to the shared context value for one dispatch call.
/// Derefs to `C`; dropping it releases whatever lock it held.
enum ContextHandle<'a, C> {
    AllConnections(MutexGuard<'a, C>),
    PerConnection(MutexGuard<'a, HashMap<ConnectionId, C>>, ConnectionId),
}

impl<C> std::ops::Deref for ContextHandle<'_, C> {
    type Target = C;
    fn deref(&self) -> &C {
        match self {
            ContextHandle::AllConnections(guard) => guard,
            ContextHandle::PerConnection(map, id) => map.get(id).expect("entry was just inserted"),
        }
    }
}

impl<C> std::ops::DerefMut for ContextHandle<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        match self {
            ContextHandle::AllConnections(guard) => guard,
            ContextHandle::PerConnection(map, id) => {
                map.get_mut(id).expect("entry was just inserted")
            }
        }
    }
}

impl<C: Clone + Send + 'static> HandlerRegistry<C> {
    pub fn new(scope: SharedContextScope<C>) -> HandlerRegistry<C> {
        let storage = match scope {
            SharedContextScope::AllConnections(value) => Storage::AllConnections(Mutex::new(value)),
            SharedContextScope::PerConnection(template) => Storage::PerConnection {
                template,
                by_connection: Mutex::new(HashMap::new()),
            },
        };
        HandlerRegistry {
            handlers: HashMap::new(),
            storage,
        }
    }

    pub fn register_request(&mut self, code: ControlCode, handler: RequestHandler<C>) {
        self.handlers.insert(code, Handler::Request(handler));
    }

    pub fn register_data(&mut self, code: ControlCode, handler: DataHandler<C>) {
        self.handlers.insert(code, Handler::Data(handler));
    }

    /// Register a Download handler for `code`. The handler writes its
    /// response directly to the socket it is given, using whatever control
    /// code(s) and framing it chooses (including more than one data packet).
    pub fn register_download(&mut self, code: ControlCode, handler: DownloadHandler<C>) {
        self.handlers.insert(code, Handler::Download(handler));
    }

    /// Register an UpDownload handler for `code`, same socket-writing
    /// contract as [`HandlerRegistry::register_download`].
    pub fn register_updownload(&mut self, code: ControlCode, handler: UpDownloadHandler<C>) {
        self.handlers.insert(code, Handler::UpDownload(handler));
    }

    /// Borrow the shared context value exclusively for `connection_id`,
    /// cloning the per-connection template on first use if the scope is
    /// `PerConnection`.
    fn lock_context(&self, connection_id: ConnectionId) -> ContextHandle<'_, C> {
        match &self.storage {
            Storage::AllConnections(mutex) => ContextHandle::AllConnections(mutex.lock().unwrap()),
            Storage::PerConnection {
                template,
                by_connection,
            } => {
                let mut map = by_connection.lock().unwrap();
                map.entry(connection_id).or_insert_with(|| template.clone());
                ContextHandle::PerConnection(map, connection_id)
            }
        }
    }

    /// Drop a connection's per-connection context clone. Called by the
    /// connection worker when a connection closes. A no-op for
    /// `AllConnections` scope.
    pub fn forget_connection(&self, connection_id: ConnectionId) {
        if let Storage::PerConnection { by_connection, .. } = &self.storage {
            by_connection.lock().unwrap().remove(&connection_id);
        }
    }

    /// Number of connections with a live per-connection context clone.
    /// Exposed for tests; always 0 for `AllConnections` scope.
    #[cfg(test)]
    fn per_connection_count(&self) -> usize {
        match &self.storage {
            Storage::PerConnection { by_connection, .. } => by_connection.lock().unwrap().len(),
            Storage::AllConnections(_) => 0,
        }
    }

    /// Classify `control_code`, resolve its handler and shared context, and
    /// invoke it. A Download/UpDownload handler writes its own response to
    /// `socket` before this returns; the caller only needs to send the
    /// trailing acknowledgement afterward.
    ///
    /// A code that sets none of the four group bits, or one with no
    /// registered handler, is dropped silently: this returns `Ok(())` rather
    /// than an error, so the caller still emits an `Accept` acknowledgement
    /// and framing is preserved for the next packet. Only a handler that is
    /// registered under a shape inconsistent with its own code's group is a
    /// real invariant violation.
    pub fn dispatch(
        &self,
        connection_id: ConnectionId,
        control_code: ControlCode,
        payload: &[u8],
        socket: &mut Socket,
        state: &mut StateContext,
    ) -> Result<()> {
        let Some(group) = Group::classify(control_code) else {
            return Ok(());
        };

        let Some(handler) = self.handlers.get(&control_code) else {
            return Ok(());
        };

        let mut context = self.lock_context(connection_id);

        match (group, handler) {
            (Group::Request, Handler::Request(f)) => f(control_code, state, &mut context),
            (Group::Data, Handler::Data(f)) => f(control_code, payload, state, &mut context),
            (Group::Download, Handler::Download(f)) => f(control_code, socket, state, &mut context),
            (Group::UpDownload, Handler::UpDownload(f)) => {
                f(control_code, payload, socket, state, &mut context)
            }
            _ => Err(ErrorKind::Invariant(format!(
                "handler registered for code {control_code:#x} does not match its group {group:?}"
            ))),
        }
    }
}
