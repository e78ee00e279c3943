//! # statewire
//!
//! A small request/response framework for TCP services where each
//! connection advances through an application-defined state machine and
//! server behavior is expressed as a table of control-code handlers.
//!
//! The wire protocol has four interaction shapes carried over a fixed-size
//! [`packet::Packet`]: Request (no payload either way), Data (client sends a
//! payload, server only acknowledges), Download (server sends a payload back),
//! and UpDownload (both directions in one exchange). See [`packet`] for the
//! control-code layout and [`registry`] for how control codes are mapped to
//! application handlers.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod packet;
pub mod registry;
pub mod server;
pub mod socket;
pub mod state;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use error::ErrorKind;
pub use packet::{ControlCode, Group, Packet};
pub use registry::{ConnectionId, HandlerRegistry, SharedContextScope};
pub use server::{Server, WorkerFailure};
pub use socket::Socket;
pub use state::{State, StateContext, StateEvent};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
