//! Socket records and their state machine.
//!
//! A [`Socket`] is owned by the poller thread from the moment its creating
//! command is applied until it is force-closed. Producer threads only ever
//! see its id and the occupancy of its slot.

pub(crate) mod slot;
pub(crate) mod udp;
pub(crate) mod write_buffer;

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;

use write_buffer::WriteQueues;

/// Logical socket id. Distinct from the OS descriptor and never reused
/// while the socket it named may still have results in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);

impl SocketId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Poller registration token.
    pub(crate) fn token(self) -> u64 {
        self.0 as u64
    }

    pub(crate) fn from_token(token: u64) -> Option<Self> {
        u32::try_from(token).ok().map(Self)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport of a socket. The discriminant doubles as the protocol tag of
/// an encoded UDP address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 0,
    Udp = 1,
    UdpV6 = 2,
}

impl Protocol {
    pub(crate) fn for_datagram(addr: &SocketAddr) -> Protocol {
        match addr {
            SocketAddr::V4(_) => Protocol::Udp,
            SocketAddr::V6(_) => Protocol::UdpV6,
        }
    }

    pub fn is_udp(self) -> bool {
        self != Protocol::Tcp
    }
}

/// Lifecycle state of a live socket.
///
/// Slot occupancy (`INVALID`/`RESERVE`) is tracked separately by the slot
/// table; a socket record only exists once its slot is live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    /// Non-blocking connect in progress.
    Connecting,
    /// Connected stream, or a UDP socket.
    Connected,
    /// Listening and polled for incoming connections.
    Listen,
    /// Listening socket not yet added to the poller.
    PendingListen,
    /// Accepted connection not yet added to the poller.
    PendingAccept,
    /// Inherited descriptor (stdin, a tty, a pipe).
    Bound,
    /// Flushing queued writes before closing; reads are discarded.
    HalfClose,
}

/// A state change that is not allowed from the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InvalidTransition {
    pub(crate) from: SocketState,
    pub(crate) op: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a socket in state {:?}", self.op, self.from)
    }
}

type Transition = Result<SocketState, InvalidTransition>;

impl SocketState {
    fn deny(self, op: &'static str) -> Transition {
        Err(InvalidTransition { from: self, op })
    }

    /// `Start`: activate a pending listener or accepted connection.
    pub(crate) fn start(self) -> Transition {
        match self {
            SocketState::PendingListen => Ok(SocketState::Listen),
            SocketState::PendingAccept => Ok(SocketState::Connected),
            s => s.deny("start"),
        }
    }

    /// The connect handshake completed.
    pub(crate) fn connected(self) -> Transition {
        match self {
            SocketState::Connecting => Ok(SocketState::Connected),
            s => s.deny("complete connect on"),
        }
    }

    /// A graceful close found queued writes.
    pub(crate) fn half_close(self) -> Transition {
        match self {
            SocketState::Connecting | SocketState::Connected | SocketState::Bound => {
                Ok(SocketState::HalfClose)
            }
            s => s.deny("half-close"),
        }
    }

    /// Whether the descriptor is registered with the poller.
    pub(crate) fn is_polled(self) -> bool {
        !matches!(self, SocketState::PendingListen | SocketState::PendingAccept)
    }

    /// Whether outbound data is accepted.
    pub(crate) fn accepts_writes(self) -> bool {
        matches!(
            self,
            SocketState::Connecting | SocketState::Connected | SocketState::Bound
        )
    }

    /// Whether a write may be attempted right away.
    pub(crate) fn can_write_now(self) -> bool {
        matches!(self, SocketState::Connected | SocketState::Bound)
    }
}

/// Per-protocol data.
pub(crate) enum Transport {
    /// Next read size for adaptive buffering.
    Stream { read_size: usize },
    /// Default destination set by `udp_connect`.
    Datagram { peer: Option<SocketAddr> },
}

/// A live socket, owned by the poller thread.
pub(crate) struct Socket {
    pub(crate) id: SocketId,
    pub(crate) fd: RawFd,
    pub(crate) protocol: Protocol,
    pub(crate) state: SocketState,
    pub(crate) opaque: usize,
    pub(crate) queues: WriteQueues,
    pub(crate) transport: Transport,
    /// Adopted through `bind`; the descriptor is never closed here.
    pub(crate) inherited: bool,
    /// Write interest currently registered.
    pub(crate) writing: bool,
    /// Next queue size that triggers a warning; 0 when none was sent.
    pub(crate) warn_size: usize,
    pub(crate) read_bytes: u64,
    pub(crate) write_bytes: u64,
}

impl Socket {
    pub(crate) fn new(
        id: SocketId,
        fd: RawFd,
        protocol: Protocol,
        state: SocketState,
        opaque: usize,
        min_read: usize,
    ) -> Self {
        let transport = match protocol {
            Protocol::Tcp => Transport::Stream {
                read_size: min_read,
            },
            Protocol::Udp | Protocol::UdpV6 => Transport::Datagram { peer: None },
        };

        Self {
            id,
            fd,
            protocol,
            state,
            opaque,
            queues: WriteQueues::default(),
            transport,
            inherited: state == SocketState::Bound,
            writing: false,
            warn_size: 0,
            read_bytes: 0,
            write_bytes: 0,
        }
    }

    /// Applies a transition, leaving the state untouched on failure.
    pub(crate) fn transition(
        &mut self,
        f: impl FnOnce(SocketState) -> Transition,
    ) -> Result<(), InvalidTransition> {
        self.state = f(self.state)?;
        Ok(())
    }

    /// Adapts the next read size after a read of `n` bytes.
    pub(crate) fn adapt_read_size(&mut self, n: usize, min: usize, max: usize) {
        if let Transport::Stream { read_size } = &mut self.transport {
            *read_size = next_read_size(*read_size, n, min, max);
        }
    }
}

/// Live sockets indexed by slot, the poller's half of the slot table.
///
/// Lookups compare the full id, so a stale id whose slot has been reused
/// finds nothing.
pub(crate) struct SocketTable {
    slots: Vec<Option<Box<Socket>>>,
}

impl SocketTable {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| None).collect(),
        }
    }

    fn index(&self, id: SocketId) -> usize {
        id.as_u32() as usize % self.slots.len()
    }

    pub(crate) fn get_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        let index = self.index(id);
        self.slots[index].as_deref_mut().filter(|s| s.id == id)
    }

    pub(crate) fn insert(&mut self, socket: Socket) -> &mut Socket {
        let index = self.index(socket.id);
        debug_assert!(self.slots[index].is_none(), "slot {index} already live");
        &mut **self.slots[index].insert(Box::new(socket))
    }

    pub(crate) fn take(&mut self, id: SocketId) -> Option<Box<Socket>> {
        let index = self.index(id);
        match &self.slots[index] {
            Some(socket) if socket.id == id => self.slots[index].take(),
            _ => None,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Socket> {
        self.slots.iter().filter_map(|s| s.as_deref())
    }
}

/// Doubles after a read that filled the buffer, halves after one that used
/// less than half of it, within `[min, max]`.
pub(crate) fn next_read_size(size: usize, n: usize, min: usize, max: usize) -> usize {
    if n == size {
        (size * 2).min(max)
    } else if size > min && n * 2 < size {
        (size / 2).max(min)
    } else {
        size
    }
}
