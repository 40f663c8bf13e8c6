//! Per-socket outbound queues.
//!
//! Every socket owns two FIFO queues. `high` always drains first; `low`
//! only moves once `high` is empty. A buffer whose transmission has begun
//! is never overtaken: partial fast-path writes land on `high`, and a
//! partially sent `low` head is raised onto `high` before anything else
//! can be queued there.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use tracing::warn;

/// Queue selection for an outbound buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// One queued outbound buffer.
pub(crate) struct WriteBuffer {
    data: Vec<u8>,
    offset: usize,
    dest: Option<SocketAddr>,
}

impl WriteBuffer {
    fn new(data: Vec<u8>, dest: Option<SocketAddr>) -> Self {
        Self {
            data,
            offset: 0,
            dest,
        }
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    fn is_partial(&self) -> bool {
        self.offset > 0
    }
}

/// Outcome of a flush attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flush {
    /// Both queues are empty.
    Drained,
    /// The descriptor stopped accepting data; queued bytes remain.
    Pending,
}

#[derive(Default)]
pub(crate) struct WriteQueues {
    high: VecDeque<WriteBuffer>,
    low: VecDeque<WriteBuffer>,
    size: usize,
}

impl WriteQueues {
    pub(crate) fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    /// Bytes currently queued across both lists.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Drops everything still queued.
    pub(crate) fn clear(&mut self) {
        self.high.clear();
        self.low.clear();
        self.size = 0;
    }

    fn push(&mut self, buffer: WriteBuffer, priority: Priority) {
        self.size += buffer.remaining().len();
        match priority {
            Priority::High => self.high.push_back(buffer),
            Priority::Low => self.low.push_back(buffer),
        }
    }

    /// Sends a stream buffer immediately when nothing is queued, otherwise
    /// queues it.
    ///
    /// `writable` says whether the socket may be written right now (it is
    /// connected). Returns `Ok(true)` when the whole buffer went out and
    /// `Ok(false)` when something was queued. A fast-path write that moved
    /// only part of the buffer queues the rest on `high`, whatever
    /// `priority` asked for.
    pub(crate) fn submit_stream<W>(
        &mut self,
        data: Vec<u8>,
        priority: Priority,
        writable: bool,
        mut write: W,
    ) -> io::Result<bool>
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        if !writable || !self.is_empty() {
            self.push(WriteBuffer::new(data, None), priority);
            return Ok(false);
        }

        let written = loop {
            match write(&data) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break 0,
                Err(e) => return Err(e),
            }
        };

        if written >= data.len() {
            return Ok(true);
        }

        let mut buffer = WriteBuffer::new(data, None);
        buffer.offset = written;
        self.push(buffer, Priority::High);
        Ok(false)
    }

    /// Datagram counterpart of [`submit_stream`](Self::submit_stream).
    ///
    /// A datagram that could not be sent whole is queued on `high` and
    /// retried on the next writable event.
    pub(crate) fn submit_datagram<S>(
        &mut self,
        data: Vec<u8>,
        dest: SocketAddr,
        priority: Priority,
        writable: bool,
        mut send: S,
    ) -> bool
    where
        S: FnMut(&[u8], &SocketAddr) -> io::Result<usize>,
    {
        if !writable || !self.is_empty() {
            self.push(WriteBuffer::new(data, Some(dest)), priority);
            return false;
        }

        match send(&data, &dest) {
            Ok(n) if n == data.len() => true,
            _ => {
                self.push(WriteBuffer::new(data, Some(dest)), Priority::High);
                false
            }
        }
    }

    /// Writes queued stream data until the descriptor blocks.
    ///
    /// A fatal write error is returned as-is; the caller force-closes the
    /// socket, which discards the queues.
    pub(crate) fn flush_stream<W>(&mut self, mut write: W) -> io::Result<Flush>
    where
        W: FnMut(&[u8]) -> io::Result<usize>,
    {
        debug_assert!(!self.low.front().is_some_and(WriteBuffer::is_partial));

        if !drain_stream(&mut self.high, &mut self.size, &mut write)? {
            return Ok(Flush::Pending);
        }

        if !self.low.is_empty() && !drain_stream(&mut self.low, &mut self.size, &mut write)? {
            self.raise_partial();
        }

        Ok(self.state())
    }

    /// Sends queued datagrams until the descriptor blocks.
    ///
    /// Datagrams that fail with anything other than `EAGAIN`/`EINTR` are
    /// dropped: UDP delivery is best-effort and one bad destination must
    /// not wedge the queue.
    pub(crate) fn flush_datagrams<S>(&mut self, mut send: S) -> Flush
    where
        S: FnMut(&[u8], &SocketAddr) -> io::Result<usize>,
    {
        if drain_datagrams(&mut self.high, &mut self.size, &mut send) {
            drain_datagrams(&mut self.low, &mut self.size, &mut send);
        }

        self.state()
    }

    /// Moves a partially sent `low` head onto the (empty) `high` queue.
    fn raise_partial(&mut self) {
        if self.low.front().is_some_and(WriteBuffer::is_partial) {
            debug_assert!(self.high.is_empty());
            if let Some(buffer) = self.low.pop_front() {
                self.high.push_back(buffer);
            }
        }
    }

    fn state(&self) -> Flush {
        if self.is_empty() {
            Flush::Drained
        } else {
            Flush::Pending
        }
    }
}

/// Returns `Ok(true)` once `list` is empty.
fn drain_stream<W>(
    list: &mut VecDeque<WriteBuffer>,
    size: &mut usize,
    write: &mut W,
) -> io::Result<bool>
where
    W: FnMut(&[u8]) -> io::Result<usize>,
{
    while let Some(front) = list.front_mut() {
        match write(front.remaining()) {
            Ok(n) => {
                let n = n.min(front.remaining().len());
                *size -= n;
                front.offset += n;

                if !front.remaining().is_empty() {
                    return Ok(false);
                }
                list.pop_front();
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}

/// Returns `true` once `list` is empty.
fn drain_datagrams<S>(list: &mut VecDeque<WriteBuffer>, size: &mut usize, send: &mut S) -> bool
where
    S: FnMut(&[u8], &SocketAddr) -> io::Result<usize>,
{
    while let Some(front) = list.front() {
        let Some(dest) = front.dest else {
            *size -= front.data.len();
            list.pop_front();
            continue;
        };

        match send(&front.data, &dest) {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                return false;
            }
            Err(e) => {
                warn!(error = %e, %dest, len = front.data.len(), "dropping undeliverable datagram");
            }
        }

        *size -= front.data.len();
        list.pop_front();
    }

    true
}
