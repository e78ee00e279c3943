//! Wire framing: the fixed-size [`Packet`] and the control-code group algebra
//! used to classify it.
//!
//! Every packet on the wire is exactly [`PACKET_SIZE`] bytes: an 8-byte
//! host-endian control code, followed by a 1024-byte body. Host-endian
//! (not network byte order) matches the reference implementation this one
//! is modeled on, which assumes both ends share an architecture; this is a
//! known limitation for heterogeneous-endian deployments. The body's
//! interpretation depends on which interaction shape the control code
//! belongs to. For Data/UpDownload codes the body only ever carries an
//! 8-byte size; the payload itself is a separate, arbitrarily large byte
//! run sent immediately after the packet (see
//! [`crate::socket::Socket::send_buffer`]), not embedded in the fixed-size
//! body.

use crate::error::{ErrorKind, Result};

/// Size of the body carried by every packet, regardless of interaction shape.
pub const BODY_SIZE: usize = 1024;

/// Total size of a packet on the wire: 8-byte control code + body.
pub const PACKET_SIZE: usize = 8 + BODY_SIZE;

/// A control code, matching the numeric layout of the framework this one is
/// modeled on: the low byte identifies the specific code, while one bit in
/// `0x0200`..`0x1000` identifies which of the four interaction shapes
/// (Request, Data, Download, UpDownload) the code belongs to.
pub type ControlCode = u64;

/// Set on any request-shaped control code (client asks the server to run a
/// callback with no payload exchange).
pub const GROUP_REQUEST: ControlCode = 0x0200;
/// Set on any data-shaped control code (client sends a payload, server
/// replies with an acknowledgement only).
pub const GROUP_DATA: ControlCode = 0x0400;
/// Set on any download-shaped control code (client asks the server to send a
/// payload back).
pub const GROUP_DOWNLOAD: ControlCode = 0x0800;
/// Set on any updownload-shaped control code (client sends a payload and the
/// server replies with one of its own, in a single exchange).
pub const GROUP_UPDOWNLOAD: ControlCode = 0x1000;

/// Mask covering every group bit, useful for validating a code sets exactly
/// the bits its constructor expects.
const GROUP_MASK: ControlCode = GROUP_REQUEST | GROUP_DATA | GROUP_DOWNLOAD | GROUP_UPDOWNLOAD;

/// Reserved codes outside the four content groups: connection lifecycle
/// events and acknowledgements. These never carry a group bit.
pub mod reserved {
    use super::ControlCode;

    /// Uninitialized / no-op control code. Never sent on the wire.
    pub const NIL: ControlCode = 0x0000;

    /// Reserved shutdown signal sent by a server to unblock a client that is
    /// waiting on a read, or by a client to tell a server it is disconnecting
    /// voluntarily.
    ///
    /// The framework this one is modeled on left this code's numeric value
    /// unspecified and inconsistent across revisions. This crate fixes it at
    /// `0x0002`: outside `GROUP_MASK`, distinct from [`NIL`], and distinct
    /// from every acknowledgement code below.
    pub const EXIT: ControlCode = 0x0002;

    /// Server accepted the request/data/download/updownload.
    pub const ACCEPT: ControlCode = 0x0101;
    /// Server rejected it; a client performing a blocking retry should retry.
    pub const REJECT: ControlCode = 0x0102;
    /// A non-retriable failure. The client's ack interpretation recognizes
    /// this code, but the core dispatcher never emits it itself: a worker
    /// that hits a non-`Callback` error records it and exits the connection
    /// without acknowledging (spec §4.5/§7) rather than sending `Failed`.
    pub const FAILED: ControlCode = 0x0103;
    /// Reserved connection-lifecycle codes. Neither is sent on the wire by
    /// this core: spec §4.5's connection loop starts directly with
    /// `recv_packet`, with no handshake packet preceding the peer's first
    /// application packet.
    pub const CONNECTED: ControlCode = 0x0104;
    pub const DISCONNECTED: ControlCode = 0x0105;
}

/// Which of the four interaction shapes a control code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Request,
    Data,
    Download,
    UpDownload,
}

impl Group {
    /// Classify `code` by its lowest-numbered set group bit. Request is
    /// checked before Data, Data before Download, Download before
    /// UpDownload, matching the order the reference dispatcher checks them
    /// in. A code may only usefully set one group bit; if more than one is
    /// set, the lowest wins.
    pub fn classify(code: ControlCode) -> Option<Group> {
        if code & GROUP_REQUEST != 0 {
            Some(Group::Request)
        } else if code & GROUP_DATA != 0 {
            Some(Group::Data)
        } else if code & GROUP_DOWNLOAD != 0 {
            Some(Group::Download)
        } else if code & GROUP_UPDOWNLOAD != 0 {
            Some(Group::UpDownload)
        } else {
            None
        }
    }
}

/// A single fixed-size frame on the wire.
///
/// `body` always holds exactly [`BODY_SIZE`] bytes. For Request, Download,
/// and acknowledgement packets the body is unused padding. For Data and
/// UpDownload packets the first 8 bytes of the body hold a host-endian
/// `size` field; the payload itself is not part of `body` at all, but is
/// sent as a separate, arbitrarily large byte run immediately following this
/// packet on the wire (see [`crate::socket::Socket::send_buffer`]/
/// [`crate::socket::Socket::recv_payload`]).
#[derive(Clone)]
pub struct Packet {
    pub control_code: ControlCode,
    pub body: [u8; BODY_SIZE],
}

impl Packet {
    /// Build a packet with an empty body, for Request codes and
    /// acknowledgements.
    pub fn new(control_code: ControlCode) -> Packet {
        Packet {
            control_code,
            body: [0u8; BODY_SIZE],
        }
    }

    /// Build a packet whose control code must belong to the Data or
    /// UpDownload group, carrying `size` as the first 8 bytes of the body.
    ///
    /// Returns [`ErrorKind::Invariant`] if `control_code` sets neither the
    /// Data nor the UpDownload group bit, matching the reference
    /// implementation's `make_data_packet`, which throws rather than
    /// silently accepting a Request/Download code here.
    pub fn new_data(control_code: ControlCode, size: u64) -> Result<Packet> {
        if control_code & (GROUP_DATA | GROUP_UPDOWNLOAD) == 0 {
            return Err(ErrorKind::Invariant(format!(
                "control code {control_code:#x} is not a Data or UpDownload code"
            )));
        }
        let mut body = [0u8; BODY_SIZE];
        body[..8].copy_from_slice(&size.to_ne_bytes());
        Ok(Packet {
            control_code,
            body,
        })
    }

    /// Read the `size` field out of a Data/UpDownload packet's body.
    pub fn data_size(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.body[..8]);
        u64::from_ne_bytes(buf)
    }

    /// Serialize this packet to its on-the-wire representation.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[..8].copy_from_slice(&self.control_code.to_ne_bytes());
        out[8..].copy_from_slice(&self.body);
        out
    }

    /// Parse a packet from its on-the-wire representation.
    pub fn from_bytes(bytes: &[u8; PACKET_SIZE]) -> Packet {
        let mut code_buf = [0u8; 8];
        code_buf.copy_from_slice(&bytes[..8]);
        let mut body = [0u8; BODY_SIZE];
        body.copy_from_slice(&bytes[8..]);
        Packet {
            control_code: u64::from_ne_bytes(code_buf),
            body,
        }
    }

    pub fn group(&self) -> Option<Group> {
        Group::classify(self.control_code)
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("control_code", &format_args!("{:#x}", self.control_code))
            .field("group", &self.group())
            .finish()
    }
}
