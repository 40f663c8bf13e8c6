use super::command::{Command, SocketOption};
use super::event::Event;
use super::handle::ReactorHandle;
use super::poller::platform::{
    domain_of, sys_accept, sys_close, sys_connect, sys_peername, sys_read, sys_recvfrom, sys_send,
    sys_sendto, sys_set_keepalive, sys_set_nodelay, sys_set_nonblocking, sys_socket,
    sys_socket_error, sys_sockname,
};
use super::poller::{Interest, Poller};
use crate::builder::{Config, ReactorBuilder};
use crate::error::{Error, Result};
use crate::message::{SocketEvent, SocketInfo};
use crate::socket::slot::SlotTable;
use crate::socket::udp::UdpDatagram;
use crate::socket::write_buffer::{Flush, Priority};
use crate::socket::{Protocol, Socket, SocketId, SocketState, SocketTable, Transport};

use libc::SOCK_STREAM;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{IntoRawFd, RawFd};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, sync_channel};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

/// The socket reactor.
///
/// A reactor owns every socket and the readiness poller. It is driven by
/// a single thread calling [`poll`](Self::poll), which:
/// - applies commands submitted through [`ReactorHandle`]s,
/// - waits for readiness and performs the actual I/O,
/// - returns one [`SocketEvent`] per call.
///
/// # Examples
///
/// ```rust,no_run
/// use sockmux::{Reactor, SocketEvent};
///
/// let mut reactor = Reactor::new().expect("reactor");
/// let handle = reactor.handle();
///
/// let listener = handle.listen(1, "127.0.0.1", 8000, 32).expect("listen");
/// handle.start(listener, 1).expect("start");
///
/// loop {
///     match reactor.poll() {
///         SocketEvent::Accept { accepted, .. } => handle.start(accepted, 2).expect("start"),
///         SocketEvent::Data { id, data, .. } => handle.send(id, data).expect("echo"),
///         SocketEvent::Exit => break,
///         _ => {}
///     }
/// }
/// ```
pub struct Reactor {
    /// Receiving side of the command channel.
    receiver: Receiver<Command>,

    /// Kept so the channel stays connected for the reactor's lifetime.
    handle: ReactorHandle,

    /// Platform-specific poller (epoll or kqueue).
    poller: Poller,

    /// Current readiness batch.
    events: Vec<Event>,

    /// Next event of the batch to dispatch.
    event_index: usize,

    /// Set after every wait; cleared once the channel is empty.
    check_commands: bool,

    sockets: SocketTable,
    slots: Arc<SlotTable>,

    /// Scratch buffer shared by every datagram read.
    udp_buffer: Vec<u8>,

    config: Config,
}

impl Reactor {
    /// Creates a reactor with the default configuration.
    pub fn new() -> Result<Self> {
        ReactorBuilder::new().build()
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        let poller = Poller::new(config.event_capacity)?;
        let (sender, receiver) = sync_channel(config.command_capacity);
        let slots = Arc::new(SlotTable::new(config.max_sockets));
        let handle = ReactorHandle::new(sender, poller.waker(), slots.clone());

        Ok(Self {
            receiver,
            handle,
            poller,
            events: Vec::with_capacity(config.event_capacity),
            event_index: 0,
            check_commands: true,
            sockets: SocketTable::new(config.max_sockets),
            slots,
            udp_buffer: vec![0; config.udp_buffer],
            config,
        })
    }

    /// Returns a new handle for submitting requests from any thread.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Whether readiness events from the last wait are still buffered.
    pub fn more(&self) -> bool {
        self.event_index < self.events.len()
    }

    /// Snapshot of every live socket.
    pub fn info(&self) -> Vec<SocketInfo> {
        self.sockets
            .iter()
            .map(|socket| SocketInfo {
                id: socket.id,
                opaque: socket.opaque,
                protocol: socket.protocol,
                state: socket.state,
                read_bytes: socket.read_bytes,
                write_bytes: socket.write_bytes,
                queued: socket.queues.size(),
                local: sys_sockname(socket.fd).ok(),
                peer: match socket.transport {
                    Transport::Datagram { peer } => peer,
                    Transport::Stream { .. } => sys_peername(socket.fd).ok(),
                },
            })
            .collect()
    }

    /// Blocks until the next result.
    ///
    /// A failing poller is reported as [`SocketEvent::Exit`].
    ///
    /// Each wait is bounded by the configured
    /// [`wait_timeout`](ReactorBuilder::wait_timeout), after which the
    /// wait is simply retried.
    pub fn poll(&mut self) -> SocketEvent {
        loop {
            if let Some(event) = self.poll_timeout(self.config.wait_timeout) {
                return event;
            }
        }
    }

    /// Returns the next result, or `None` once `timeout` elapses with
    /// nothing to report. `None` as timeout waits indefinitely.
    ///
    /// Pending commands are applied before blocking. Readiness events are
    /// dispatched one per call; [`more`](Self::more) tells whether some
    /// are still buffered.
    pub fn poll_timeout(&mut self, timeout: Option<Duration>) -> Option<SocketEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut waited = false;

        loop {
            if self.check_commands {
                if let Some(result) = self.drain_commands() {
                    return Some(result);
                }
            }

            if self.more() {
                let index = self.event_index;
                self.event_index += 1;

                if let Some(result) = self.dispatch(index) {
                    return Some(result);
                }
                continue;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if waited && remaining.is_some_and(|r| r.is_zero()) {
                return None;
            }

            self.event_index = 0;
            if let Err(e) = self.poller.wait(&mut self.events, remaining) {
                // Retrying cannot succeed; the owner stops on `Exit`.
                error!(error = %e, "poller wait failed");
                return Some(SocketEvent::Exit);
            }

            self.check_commands = true;
            waited = true;
        }
    }

    /// Applies queued commands until one produces a result.
    fn drain_commands(&mut self) -> Option<SocketEvent> {
        while let Ok(cmd) = self.receiver.try_recv() {
            if let Some(result) = self.apply(cmd) {
                return Some(result);
            }
        }

        self.check_commands = false;
        None
    }

    fn apply(&mut self, cmd: Command) -> Option<SocketEvent> {
        trace!(tag = %cmd.tag(), id = ?cmd.id(), "apply command");

        match cmd {
            Command::Open {
                id,
                opaque,
                host,
                port,
            } => self.open(id, opaque, &host, port),
            Command::Bind { id, opaque, fd } => self.bind(id, opaque, fd),
            Command::Listen { id, opaque, fd } => self.listen(id, opaque, fd.into_raw_fd()),
            Command::Close {
                id,
                opaque,
                shutdown,
            } => self.close(id, opaque, shutdown),
            Command::Start { id, opaque } => self.start(id, opaque),
            Command::Send { id, data, priority } => self.send(id, data, priority, None),
            Command::SendUdp { id, data, addr } => self.send(id, data, Priority::High, Some(addr)),
            Command::SetUdpAddress { id, addr } => self.set_udp_address(id, addr),
            Command::SetOpt { id, option } => self.set_opt(id, option),
            Command::CreateUdp {
                id,
                opaque,
                fd,
                protocol,
            } => self.create_udp(id, opaque, fd.into_raw_fd(), protocol),
            Command::Exit => Some(SocketEvent::Exit),
        }
    }

    fn open(&mut self, id: SocketId, opaque: usize, host: &str, port: u16) -> Option<SocketEvent> {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(_) => {
                let err = Error::Resolve {
                    host: host.to_owned(),
                    port,
                };
                return Some(self.abandon(id, opaque, err));
            }
        };

        let mut last_err = None;
        for addr in addrs {
            let fd = match sys_socket(domain_of(&addr), SOCK_STREAM) {
                Ok(fd) => fd,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            if let Err(e) = sys_set_keepalive(fd) {
                trace!(%id, fd, error = %e, "keepalive not set");
            }

            let state = match sys_connect(fd, &addr) {
                Ok(()) => SocketState::Connected,
                Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => SocketState::Connecting,
                Err(e) => {
                    sys_close(fd);
                    last_err = Some(e);
                    continue;
                }
            };

            let connecting = state == SocketState::Connecting;
            if let Err(e) = self.install(id, fd, Protocol::Tcp, state, opaque, connecting) {
                sys_close(fd);
                return Some(self.abandon(id, opaque, e));
            }

            debug!(%id, fd, %addr, ?state, "connect issued");
            return (!connecting).then(|| SocketEvent::Open {
                id,
                opaque,
                info: addr.to_string(),
            });
        }

        let message = match last_err {
            Some(e) => e.to_string(),
            None => Error::Resolve {
                host: host.to_owned(),
                port,
            }
            .to_string(),
        };
        Some(self.abandon(id, opaque, message))
    }

    fn bind(&mut self, id: SocketId, opaque: usize, fd: RawFd) -> Option<SocketEvent> {
        let installed = sys_set_nonblocking(fd)
            .and_then(|_| self.install(id, fd, Protocol::Tcp, SocketState::Bound, opaque, false));

        if let Err(e) = installed {
            return Some(self.abandon(id, opaque, e));
        }

        debug!(%id, fd, "descriptor bound");
        Some(SocketEvent::Open {
            id,
            opaque,
            info: "binding".to_owned(),
        })
    }

    fn listen(&mut self, id: SocketId, opaque: usize, fd: RawFd) -> Option<SocketEvent> {
        let state = SocketState::PendingListen;
        if let Err(e) = self.install(id, fd, Protocol::Tcp, state, opaque, false) {
            sys_close(fd);
            return Some(self.abandon(id, opaque, e));
        }

        debug!(%id, fd, "listener installed");
        None
    }

    fn create_udp(
        &mut self,
        id: SocketId,
        opaque: usize,
        fd: RawFd,
        protocol: Protocol,
    ) -> Option<SocketEvent> {
        let state = SocketState::Connected;
        if let Err(e) = self.install(id, fd, protocol, state, opaque, false) {
            sys_close(fd);
            return Some(self.abandon(id, opaque, e));
        }

        debug!(%id, fd, ?protocol, "udp socket created");
        None
    }

    fn start(&mut self, id: SocketId, opaque: usize) -> Option<SocketEvent> {
        let Some(socket) = self.sockets.get_mut(id) else {
            return Some(SocketEvent::Error {
                id,
                opaque,
                message: "invalid socket".to_owned(),
            });
        };

        let info = match socket.state {
            SocketState::PendingListen | SocketState::PendingAccept => {
                if let Err(e) = self.poller.add(socket.fd, id.token()) {
                    return Some(self.fail(id, e));
                }
                if let Err(e) = socket.transition(SocketState::start) {
                    warn!(%id, error = %e, "start rejected");
                    return None;
                }
                "start"
            }
            SocketState::Connected => "transfer",
            // A half-closed socket reports its close later.
            _ => return None,
        };

        socket.opaque = opaque;
        debug!(%id, state = ?socket.state, info, "socket started");
        Some(SocketEvent::Open {
            id,
            opaque,
            info: info.to_owned(),
        })
    }

    fn close(&mut self, id: SocketId, opaque: usize, shutdown: bool) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;

        if !shutdown
            && !socket.queues.is_empty()
            && matches!(
                socket.state,
                SocketState::Connected | SocketState::Bound | SocketState::HalfClose
            )
        {
            if let Err(e) = drain_queues(socket) {
                return Some(self.fail(id, e));
            }
        }

        let socket = self.sockets.get_mut(id)?;
        if !shutdown && !socket.queues.is_empty() {
            if socket.state != SocketState::HalfClose {
                if let Err(e) = socket.transition(SocketState::half_close) {
                    warn!(%id, error = %e, "closing at once");
                    self.force_close(id);
                    return Some(SocketEvent::Close { id, opaque });
                }
                debug!(%id, queued = socket.queues.size(), "half-closed");
            }
            return None;
        }

        self.force_close(id);
        Some(SocketEvent::Close { id, opaque })
    }

    fn send(
        &mut self,
        id: SocketId,
        data: Vec<u8>,
        priority: Priority,
        dest: Option<SocketAddr>,
    ) -> Option<SocketEvent> {
        let threshold = self.config.warning_threshold;
        let Some(socket) = self.sockets.get_mut(id) else {
            trace!(%id, len = data.len(), "send to closed socket dropped");
            return None;
        };

        if data.is_empty() || !socket.state.accepts_writes() {
            trace!(%id, state = ?socket.state, len = data.len(), "send dropped");
            return None;
        }

        let fd = socket.fd;
        let len = data.len();
        let queued = socket.queues.size();
        let writable = socket.state.can_write_now();

        let flushed = match socket.transport {
            Transport::Stream { .. } => {
                if dest.is_some() {
                    warn!(%id, "datagram send on a stream socket dropped");
                    return None;
                }
                match socket
                    .queues
                    .submit_stream(data, priority, writable, |buf| sys_send(fd, buf))
                {
                    Ok(flushed) => flushed,
                    Err(e) => return Some(self.fail(id, e)),
                }
            }
            Transport::Datagram { peer } => {
                let Some(dest) = dest.or(peer) else {
                    warn!(%id, "datagram without destination dropped");
                    return None;
                };
                if Protocol::for_datagram(&dest) != socket.protocol {
                    warn!(%id, %dest, "datagram to foreign address family dropped");
                    return None;
                }
                socket
                    .queues
                    .submit_datagram(data, dest, priority, writable, |buf, addr| {
                        sys_sendto(fd, buf, addr)
                    })
            }
        };

        socket.write_bytes += (len + queued - socket.queues.size()) as u64;
        if flushed {
            return None;
        }

        if let Err(e) = set_writing(&self.poller, socket, true) {
            return Some(self.fail(id, e));
        }

        check_warning(socket, threshold)
    }

    fn set_udp_address(&mut self, id: SocketId, addr: SocketAddr) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;

        if Protocol::for_datagram(&addr) == socket.protocol {
            if let Transport::Datagram { peer } = &mut socket.transport {
                *peer = Some(addr);
                return None;
            }
        }

        Some(SocketEvent::Error {
            id,
            opaque: socket.opaque,
            message: "protocol mismatch".to_owned(),
        })
    }

    fn set_opt(&mut self, id: SocketId, option: SocketOption) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;

        match option {
            SocketOption::NoDelay(on) if socket.protocol == Protocol::Tcp => {
                if let Err(e) = sys_set_nodelay(socket.fd, on) {
                    debug!(%id, error = %e, "TCP_NODELAY not set");
                }
            }
            SocketOption::NoDelay(_) => {}
        }

        None
    }

    /// Handles the readiness event at `index` of the current batch.
    fn dispatch(&mut self, index: usize) -> Option<SocketEvent> {
        let event = self.events[index];
        let id = SocketId::from_token(event.token)?;

        // Stale events of a socket closed earlier in the batch find nothing.
        let socket = self.sockets.get_mut(id)?;

        match socket.state {
            SocketState::Listen => return self.report_accept(id),
            SocketState::Connecting => return self.report_connect(id),
            SocketState::PendingListen | SocketState::PendingAccept => {
                warn!(%id, state = ?socket.state, "event on unpolled socket");
                return None;
            }
            _ => {}
        }

        if event.readable {
            let result = if socket.protocol.is_udp() {
                self.forward_datagram(id)
            } else {
                self.forward_stream(id)
            };

            if let Some(result) = result {
                // Replay the rest of the event on the next call.
                if (event.writable || event.error) && self.sockets.get_mut(id).is_some() {
                    self.events[index].readable = false;
                    self.event_index = index;
                }
                return Some(result);
            }
        }

        if event.writable {
            if let Some(result) = self.flush(id) {
                return Some(result);
            }
        }

        if event.error {
            return self.report_error(id);
        }

        if event.eof && !event.readable && !event.writable {
            return self.close_event(id);
        }

        None
    }

    fn report_accept(&mut self, id: SocketId) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;
        let (fd, opaque) = (socket.fd, socket.opaque);

        let (client, peer) = match sys_accept(fd) {
            Ok(accepted) => accepted,
            Err(e) if matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE)) => {
                return Some(SocketEvent::Error {
                    id,
                    opaque,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                trace!(%id, error = %e, "accept retried later");
                return None;
            }
        };

        let Some(accepted) = self.slots.reserve() else {
            sys_close(client);
            return Some(SocketEvent::Error {
                id,
                opaque,
                message: Error::IdExhausted.to_string(),
            });
        };

        if let Err(e) = sys_set_keepalive(client) {
            trace!(id = %accepted, error = %e, "keepalive not set");
        }

        let state = SocketState::PendingAccept;
        if let Err(e) = self.install(accepted, client, Protocol::Tcp, state, opaque, false) {
            sys_close(client);
            self.slots.release(accepted);
            return Some(SocketEvent::Error {
                id,
                opaque,
                message: e.to_string(),
            });
        }

        debug!(%id, %accepted, %peer, "connection accepted");
        Some(SocketEvent::Accept {
            id,
            opaque,
            accepted,
            peer: peer.to_string(),
        })
    }

    fn report_connect(&mut self, id: SocketId) -> Option<SocketEvent> {
        let fd = self.sockets.get_mut(id)?.fd;

        match sys_socket_error(fd) {
            Ok(None) => {}
            Ok(Some(e)) | Err(e) => return Some(self.fail(id, e)),
        }

        let socket = self.sockets.get_mut(id)?;
        if let Err(e) = socket.transition(SocketState::connected) {
            warn!(%id, error = %e, "connect completion ignored");
            return None;
        }

        // Data queued while connecting keeps write interest on.
        if socket.queues.is_empty() {
            if let Err(e) = set_writing(&self.poller, socket, false) {
                return Some(self.fail(id, e));
            }
        }

        let opaque = socket.opaque;
        let info = sys_peername(fd).map(|a| a.to_string()).unwrap_or_default();

        debug!(%id, peer = %info, "connected");
        Some(SocketEvent::Open { id, opaque, info })
    }

    fn report_error(&mut self, id: SocketId) -> Option<SocketEvent> {
        let fd = self.sockets.get_mut(id)?.fd;

        let message = match sys_socket_error(fd) {
            Ok(Some(e)) | Err(e) => e.to_string(),
            Ok(None) => "unknown socket error".to_owned(),
        };
        Some(self.fail(id, message))
    }

    fn forward_stream(&mut self, id: SocketId) -> Option<SocketEvent> {
        let (min, max) = (self.config.min_read_buffer, self.config.max_read_buffer);
        let socket = self.sockets.get_mut(id)?;

        let Transport::Stream { read_size } = socket.transport else {
            return None;
        };

        let mut buffer = vec![0; read_size];
        match sys_read(socket.fd, &mut buffer) {
            Ok(0) => self.close_event(id),
            Ok(n) => {
                socket.adapt_read_size(n, min, max);
                socket.read_bytes += n as u64;

                if socket.state == SocketState::HalfClose {
                    return None;
                }

                buffer.truncate(n);
                Some(SocketEvent::Data {
                    id,
                    opaque: socket.opaque,
                    data: buffer,
                })
            }
            Err(e) if is_transient(&e) => None,
            Err(e) => Some(self.fail(id, e)),
        }
    }

    fn forward_datagram(&mut self, id: SocketId) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;

        match sys_recvfrom(socket.fd, &mut self.udp_buffer) {
            Ok((n, from)) => {
                socket.read_bytes += n as u64;

                if socket.state == SocketState::HalfClose {
                    return None;
                }

                Some(SocketEvent::Udp {
                    id,
                    opaque: socket.opaque,
                    datagram: UdpDatagram::new(&self.udp_buffer[..n], &from),
                })
            }
            Err(e) if is_transient(&e) => None,
            Err(e) => Some(self.fail(id, e)),
        }
    }

    /// Drains the write queues on writable readiness.
    fn flush(&mut self, id: SocketId) -> Option<SocketEvent> {
        let socket = self.sockets.get_mut(id)?;

        match drain_queues(socket) {
            Ok(Flush::Pending) => None,
            Ok(Flush::Drained) if socket.state == SocketState::HalfClose => self.close_event(id),
            Ok(Flush::Drained) => {
                if let Err(e) = set_writing(&self.poller, socket, false) {
                    return Some(self.fail(id, e));
                }

                (socket.warn_size > 0).then(|| {
                    socket.warn_size = 0;
                    SocketEvent::Warning {
                        id,
                        opaque: socket.opaque,
                        queued_kib: 0,
                    }
                })
            }
            Err(e) => Some(self.fail(id, e)),
        }
    }

    /// Registers a socket under its reserved id and marks the slot live.
    fn install(
        &mut self,
        id: SocketId,
        fd: RawFd,
        protocol: Protocol,
        state: SocketState,
        opaque: usize,
        writing: bool,
    ) -> io::Result<()> {
        if state.is_polled() {
            self.poller.add(fd, id.token())?;

            if writing {
                if let Err(e) = self.poller.enable(fd, id.token(), Interest::READ_WRITE) {
                    self.poller.del(fd);
                    return Err(e);
                }
            }
        }

        let mut socket = Socket::new(id, fd, protocol, state, opaque, self.config.min_read_buffer);
        socket.writing = writing;

        self.slots.occupy(id);
        self.sockets.insert(socket);
        Ok(())
    }

    /// Gives back a reservation whose socket never came to life.
    fn abandon(&mut self, id: SocketId, opaque: usize, error: impl fmt::Display) -> SocketEvent {
        self.slots.release(id);

        let message = error.to_string();
        debug!(%id, error = %message, "socket not created");
        SocketEvent::Error {
            id,
            opaque,
            message,
        }
    }

    /// Tears a socket down and frees its slot.
    ///
    /// Queued writes are discarded. An inherited descriptor is only
    /// deregistered, never closed.
    fn force_close(&mut self, id: SocketId) -> Option<Box<Socket>> {
        let mut socket = self.sockets.take(id)?;

        if socket.state.is_polled() {
            self.poller.del(socket.fd);
        }
        if !socket.inherited {
            sys_close(socket.fd);
        }

        socket.queues.clear();
        self.slots.release(id);

        debug!(%id, fd = socket.fd, "socket closed");
        Some(socket)
    }

    fn close_event(&mut self, id: SocketId) -> Option<SocketEvent> {
        self.force_close(id).map(|socket| SocketEvent::Close {
            id,
            opaque: socket.opaque,
        })
    }

    /// Force-closes a socket after a fatal error.
    fn fail(&mut self, id: SocketId, error: impl fmt::Display) -> SocketEvent {
        let message = error.to_string();
        let opaque = self.force_close(id).map_or(0, |socket| socket.opaque);

        debug!(%id, error = %message, "socket failed");
        SocketEvent::Error {
            id,
            opaque,
            message,
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // Commands still in the channel close their descriptors when the
        // receiver drops.
        let ids: Vec<SocketId> = self.sockets.iter().map(|socket| socket.id).collect();
        for id in ids {
            self.force_close(id);
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Toggles write interest, skipping the syscall when nothing changes.
fn set_writing(poller: &Poller, socket: &mut Socket, on: bool) -> io::Result<()> {
    if socket.writing == on {
        return Ok(());
    }

    let interest = if on {
        Interest::READ_WRITE
    } else {
        Interest::READ
    };
    poller.enable(socket.fd, socket.id.token(), interest)?;

    socket.writing = on;
    Ok(())
}

/// Writes as much queued data as the descriptor takes.
fn drain_queues(socket: &mut Socket) -> io::Result<Flush> {
    let fd = socket.fd;
    let before = socket.queues.size();

    let flush = if socket.protocol.is_udp() {
        socket
            .queues
            .flush_datagrams(|buf, addr| sys_sendto(fd, buf, addr))
    } else {
        socket.queues.flush_stream(|buf| sys_send(fd, buf))?
    };

    socket.write_bytes += (before - socket.queues.size()) as u64;
    Ok(flush)
}

/// Reports a queue that crossed the socket's next warning mark, then
/// doubles the mark.
fn check_warning(socket: &mut Socket, threshold: usize) -> Option<SocketEvent> {
    let size = socket.queues.size();
    let mark = if socket.warn_size == 0 {
        threshold
    } else {
        socket.warn_size
    };

    if size < mark {
        return None;
    }

    socket.warn_size = mark.saturating_mul(2);
    warn!(id = %socket.id, queued = size, "write queue is growing");

    Some(SocketEvent::Warning {
        id: socket.id,
        opaque: socket.opaque,
        queued_kib: size.div_ceil(1024),
    })
}
