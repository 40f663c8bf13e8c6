use crate::socket::write_buffer::Priority;
use crate::socket::{Protocol, SocketId};

use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};

/// Socket options settable through [`Command::SetOpt`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SocketOption {
    NoDelay(bool),
}

/// A request for the reactor thread.
///
/// Commands that create a socket carry an id already reserved in the
/// slot table; the reactor either installs the socket under that id or
/// releases the reservation. Descriptors created by the producer travel
/// as `OwnedFd`, so a command dropped unapplied closes them.
pub(crate) enum Command {
    /// Resolve and connect.
    Open {
        id: SocketId,
        opaque: usize,
        host: String,
        port: u16,
    },
    /// Adopt an existing descriptor.
    Bind {
        id: SocketId,
        opaque: usize,
        fd: RawFd,
    },
    /// Install a bound, listening descriptor without polling it.
    Listen {
        id: SocketId,
        opaque: usize,
        fd: OwnedFd,
    },
    Close {
        id: SocketId,
        opaque: usize,
        shutdown: bool,
    },
    Start {
        id: SocketId,
        opaque: usize,
    },
    Send {
        id: SocketId,
        data: Vec<u8>,
        priority: Priority,
    },
    SendUdp {
        id: SocketId,
        data: Vec<u8>,
        addr: SocketAddr,
    },
    SetUdpAddress {
        id: SocketId,
        addr: SocketAddr,
    },
    SetOpt {
        id: SocketId,
        option: SocketOption,
    },
    CreateUdp {
        id: SocketId,
        opaque: usize,
        fd: OwnedFd,
        protocol: Protocol,
    },
    Exit,
}

impl Command {
    /// One-byte tag naming the command in traces.
    pub(crate) fn tag(&self) -> char {
        match self {
            Command::Open { .. } => 'O',
            Command::Bind { .. } => 'B',
            Command::Listen { .. } => 'L',
            Command::Close { .. } => 'K',
            Command::Start { .. } => 'S',
            Command::Send {
                priority: Priority::High,
                ..
            } => 'D',
            Command::Send {
                priority: Priority::Low,
                ..
            } => 'P',
            Command::SendUdp { .. } => 'A',
            Command::SetUdpAddress { .. } => 'C',
            Command::SetOpt { .. } => 'T',
            Command::CreateUdp { .. } => 'U',
            Command::Exit => 'X',
        }
    }

    /// Target socket, if any.
    pub(crate) fn id(&self) -> Option<SocketId> {
        match self {
            Command::Open { id, .. }
            | Command::Bind { id, .. }
            | Command::Listen { id, .. }
            | Command::Close { id, .. }
            | Command::Start { id, .. }
            | Command::Send { id, .. }
            | Command::SendUdp { id, .. }
            | Command::SetUdpAddress { id, .. }
            | Command::SetOpt { id, .. }
            | Command::CreateUdp { id, .. } => Some(*id),
            Command::Exit => None,
        }
    }

    /// Id reserved by the producer for the socket this command creates.
    pub(crate) fn reserved_id(&self) -> Option<SocketId> {
        match self {
            Command::Open { id, .. }
            | Command::Bind { id, .. }
            | Command::Listen { id, .. }
            | Command::CreateUdp { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_the_control_vocabulary() {
        let id = SocketId::new(1);
        let cases = [
            (
                Command::Open {
                    id,
                    opaque: 0,
                    host: "localhost".into(),
                    port: 1,
                },
                'O',
            ),
            (Command::Close { id, opaque: 0, shutdown: true }, 'K'),
            (Command::Start { id, opaque: 0 }, 'S'),
            (
                Command::Send {
                    id,
                    data: vec![],
                    priority: Priority::High,
                },
                'D',
            ),
            (
                Command::Send {
                    id,
                    data: vec![],
                    priority: Priority::Low,
                },
                'P',
            ),
            (
                Command::SetOpt {
                    id,
                    option: SocketOption::NoDelay(true),
                },
                'T',
            ),
            (Command::Exit, 'X'),
        ];

        for (cmd, tag) in cases {
            assert_eq!(cmd.tag(), tag);
        }
    }

    #[test]
    fn only_creating_commands_own_their_id() {
        let id = SocketId::new(3);

        assert_eq!(Command::Exit.id(), None);
        assert_eq!(Command::Exit.reserved_id(), None);
        assert_eq!(
            Command::Bind {
                id,
                opaque: 0,
                fd: 0
            }
            .reserved_id(),
            Some(id)
        );

        let start = Command::Start { id, opaque: 0 };
        assert_eq!(start.id(), Some(id));
        assert_eq!(start.reserved_id(), None);

        let send = Command::Send {
            id,
            data: vec![1],
            priority: Priority::Low,
        };
        assert_eq!(send.reserved_id(), None);
    }
}
