//! Results returned by [`Reactor::poll`](crate::Reactor::poll).

use crate::socket::udp::UdpDatagram;
use crate::socket::{Protocol, SocketId, SocketState};

use std::net::SocketAddr;

/// One result produced by the reactor.
///
/// Every variant tied to a socket carries its id and the opaque token the
/// socket was created (or last started) with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Bytes read from a stream socket.
    Data {
        id: SocketId,
        opaque: usize,
        data: Vec<u8>,
    },

    /// The socket was closed, by request or because the peer went away.
    Close { id: SocketId, opaque: usize },

    /// The socket became usable. `info` is the peer address of a
    /// connection, or `"start"`, `"transfer"`, `"binding"`.
    Open {
        id: SocketId,
        opaque: usize,
        info: String,
    },

    /// A listener accepted a connection. The new socket is pending until
    /// it is started.
    Accept {
        id: SocketId,
        opaque: usize,
        accepted: SocketId,
        peer: String,
    },

    /// The operation or the socket failed. When the failure is fatal the
    /// socket is already closed.
    Error {
        id: SocketId,
        opaque: usize,
        message: String,
    },

    /// The reactor processed an exit request, or its poller failed and
    /// it cannot continue.
    Exit,

    /// A datagram arrived on a UDP socket.
    Udp {
        id: SocketId,
        opaque: usize,
        datagram: UdpDatagram,
    },

    /// The write queue crossed another warning mark. `queued_kib` is 0
    /// once the queue has drained again.
    Warning {
        id: SocketId,
        opaque: usize,
        queued_kib: usize,
    },
}

impl SocketEvent {
    /// The socket this result refers to, if any.
    pub fn id(&self) -> Option<SocketId> {
        match self {
            SocketEvent::Data { id, .. }
            | SocketEvent::Close { id, .. }
            | SocketEvent::Open { id, .. }
            | SocketEvent::Accept { id, .. }
            | SocketEvent::Error { id, .. }
            | SocketEvent::Udp { id, .. }
            | SocketEvent::Warning { id, .. } => Some(*id),
            SocketEvent::Exit => None,
        }
    }

    /// The routing token echoed back for this result, if any.
    pub fn opaque(&self) -> Option<usize> {
        match self {
            SocketEvent::Data { opaque, .. }
            | SocketEvent::Close { opaque, .. }
            | SocketEvent::Open { opaque, .. }
            | SocketEvent::Accept { opaque, .. }
            | SocketEvent::Error { opaque, .. }
            | SocketEvent::Udp { opaque, .. }
            | SocketEvent::Warning { opaque, .. } => Some(*opaque),
            SocketEvent::Exit => None,
        }
    }
}

/// Snapshot of one live socket, from [`Reactor::info`](crate::Reactor::info).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    pub id: SocketId,
    pub opaque: usize,
    pub protocol: Protocol,
    pub state: SocketState,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Bytes waiting in the write queues.
    pub queued: usize,
    pub local: Option<SocketAddr>,
    /// Connected peer, or the default destination of a UDP socket.
    pub peer: Option<SocketAddr>,
}
