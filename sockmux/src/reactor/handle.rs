use super::command::{Command, SocketOption};
use super::poller::Waker;
use super::poller::platform::{domain_of, sys_bind, sys_listen, sys_set_reuseaddr, sys_socket};
use crate::error::{Error, Result};
use crate::socket::slot::{SlotState, SlotTable};
use crate::socket::write_buffer::Priority;
use crate::socket::{Protocol, SocketId};

use libc::{AF_INET, SOCK_DGRAM, SOCK_STREAM};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use tracing::trace;

/// Thread-safe handle for submitting requests to a [`Reactor`](super::Reactor).
///
/// Handles are cheap to clone and may be used from any thread. Every
/// request is applied on the reactor thread in submission order; results
/// come back through [`Reactor::poll`](super::Reactor::poll).
///
/// A handle used on the reactor thread itself blocks once the command
/// channel is full, so that thread must keep polling.
#[derive(Clone)]
pub struct ReactorHandle {
    /// Sender side of the command channel.
    sender: SyncSender<Command>,

    /// Interrupts a blocked `wait()`.
    waker: Arc<Waker>,

    slots: Arc<SlotTable>,
}

impl ReactorHandle {
    pub(crate) fn new(sender: SyncSender<Command>, waker: Arc<Waker>, slots: Arc<SlotTable>) -> Self {
        Self {
            sender,
            waker,
            slots,
        }
    }

    /// Sends a command to the reactor and wakes it.
    ///
    /// An undeliverable command gives back the id it reserved. Any
    /// descriptor it carried is closed when the command drops.
    fn submit(&self, cmd: Command) -> Result<()> {
        trace!(tag = %cmd.tag(), id = ?cmd.id(), "submit command");

        if let Err(err) = self.sender.send(cmd) {
            if let Some(id) = err.0.reserved_id() {
                self.slots.release(id);
            }
            return Err(Error::Closed);
        }

        self.waker.wake();
        Ok(())
    }

    fn reserve(&self) -> Result<SocketId> {
        self.slots.reserve().ok_or(Error::IdExhausted)
    }

    /// Opens a TCP connection to `host:port`.
    ///
    /// Returns the new socket id at once. The outcome arrives later as
    /// [`SocketEvent::Open`](crate::SocketEvent::Open) or
    /// [`SocketEvent::Error`](crate::SocketEvent::Error).
    pub fn connect(&self, opaque: usize, host: &str, port: u16) -> Result<SocketId> {
        let id = self.reserve()?;
        self.submit(Command::Open {
            id,
            opaque,
            host: host.to_owned(),
            port,
        })?;
        Ok(id)
    }

    /// Binds and listens on `host:port`.
    ///
    /// Address and bind errors are reported here. The listener stays
    /// inactive until [`start`](Self::start) is called for it.
    pub fn listen(&self, opaque: usize, host: &str, port: u16, backlog: i32) -> Result<SocketId> {
        let (fd, _) = open_bound(host, port, SOCK_STREAM, sys_set_reuseaddr)?;
        sys_listen(fd.as_raw_fd(), backlog)?;

        let id = self.reserve()?;
        self.submit(Command::Listen { id, opaque, fd })?;
        Ok(id)
    }

    /// Adopts an existing descriptor, such as stdin or a serial line.
    ///
    /// The descriptor is switched to non-blocking mode and polled for
    /// reads; closing the socket never closes it.
    pub fn bind(&self, opaque: usize, fd: RawFd) -> Result<SocketId> {
        let id = self.reserve()?;
        self.submit(Command::Bind { id, opaque, fd })?;
        Ok(id)
    }

    /// Activates a pending listener or accepted connection, or hands a
    /// connected socket over to a new `opaque` owner.
    pub fn start(&self, id: SocketId, opaque: usize) -> Result<()> {
        self.submit(Command::Start { id, opaque })
    }

    /// Closes a socket once its queued writes are flushed.
    pub fn close(&self, id: SocketId, opaque: usize) -> Result<()> {
        self.submit(Command::Close {
            id,
            opaque,
            shutdown: false,
        })
    }

    /// Closes a socket at once, discarding queued writes.
    pub fn shutdown(&self, id: SocketId, opaque: usize) -> Result<()> {
        self.submit(Command::Close {
            id,
            opaque,
            shutdown: true,
        })
    }

    fn send_with(&self, id: SocketId, data: Vec<u8>, priority: Priority) -> Result<()> {
        if self.slots.state(id) == SlotState::Invalid {
            return Err(Error::InvalidSocket(id));
        }
        self.submit(Command::Send { id, data, priority })
    }

    /// Queues `data` on the high-priority list.
    ///
    /// Ownership of the buffer moves to the reactor. It is dropped
    /// unsent if the socket is gone by the time the command is applied.
    pub fn send(&self, id: SocketId, data: Vec<u8>) -> Result<()> {
        self.send_with(id, data, Priority::High)
    }

    /// Queues `data` behind every high-priority buffer.
    pub fn send_low_priority(&self, id: SocketId, data: Vec<u8>) -> Result<()> {
        self.send_with(id, data, Priority::Low)
    }

    /// Creates a UDP socket, bound to `local` when given, otherwise an
    /// unbound IPv4 socket.
    pub fn udp(&self, opaque: usize, local: Option<(&str, u16)>) -> Result<SocketId> {
        let (fd, protocol) = match local {
            Some((host, port)) => {
                let (fd, addr) = open_bound(host, port, SOCK_DGRAM, |_| Ok(()))?;
                (fd, Protocol::for_datagram(&addr))
            }
            None => (owned(sys_socket(AF_INET, SOCK_DGRAM)?), Protocol::Udp),
        };

        let id = self.reserve()?;

        self.submit(Command::CreateUdp {
            id,
            opaque,
            fd,
            protocol,
        })?;
        Ok(id)
    }

    /// Sends one datagram to `addr`.
    pub fn send_udp(&self, id: SocketId, addr: SocketAddr, data: Vec<u8>) -> Result<()> {
        if self.slots.state(id) == SlotState::Invalid {
            return Err(Error::InvalidSocket(id));
        }
        self.submit(Command::SendUdp { id, data, addr })
    }

    /// Sets the default destination of a UDP socket.
    pub fn udp_connect(&self, id: SocketId, host: &str, port: u16) -> Result<()> {
        let addr = resolve(host, port)?
            .next()
            .ok_or_else(|| Error::Resolve {
                host: host.to_owned(),
                port,
            })?;

        self.submit(Command::SetUdpAddress { id, addr })
    }

    /// Disables Nagle's algorithm on a TCP socket.
    pub fn nodelay(&self, id: SocketId) -> Result<()> {
        self.submit(Command::SetOpt {
            id,
            option: SocketOption::NoDelay(true),
        })
    }

    /// Asks the reactor to report [`SocketEvent::Exit`](crate::SocketEvent::Exit).
    pub fn exit(&self) -> Result<()> {
        self.submit(Command::Exit)
    }
}

fn owned(fd: RawFd) -> OwnedFd {
    // SAFETY: `fd` was just returned by `socket(2)` and has no other owner.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

fn resolve(host: &str, port: u16) -> Result<std::vec::IntoIter<SocketAddr>> {
    (host, port).to_socket_addrs().map_err(|_| Error::Resolve {
        host: host.to_owned(),
        port,
    })
}

/// Creates a socket of type `ty` bound to the first usable address of
/// `host:port`. `configure` runs between creation and `bind`.
fn open_bound(
    host: &str,
    port: u16,
    ty: libc::c_int,
    configure: impl Fn(RawFd) -> std::io::Result<()>,
) -> Result<(OwnedFd, SocketAddr)> {
    let mut last_err = None;

    for addr in resolve(host, port)? {
        let fd = match sys_socket(domain_of(&addr), ty) {
            Ok(fd) => owned(fd),
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        match configure(fd.as_raw_fd()).and_then(|_| sys_bind(fd.as_raw_fd(), &addr)) {
            Ok(()) => return Ok((fd, addr)),
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(e) => Error::Io(e),
        None => Error::Resolve {
            host: host.to_owned(),
            port,
        },
    })
}
