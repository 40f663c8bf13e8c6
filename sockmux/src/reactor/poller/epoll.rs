//! Linux `epoll`-based poller.
//!
//! The poller owns the epoll instance, an internal `eventfd` used as a
//! wake-up signal, and a reusable buffer of raw epoll events.

use super::common::{Interest, Waker};
use super::platform::sys_close;
use crate::reactor::event::{Event, push_merged};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token for the wake-up eventfd.
///
/// Socket ids are masked to 31 bits, so this never collides.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Arc<Waker>,
}

impl EpollPoller {
    /// Creates the epoll instance and registers the wake-up eventfd.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            sys_close(epoll);
            return Err(err);
        }

        let waker = Arc::new(Waker {
            read: eventfd,
            write: eventfd,
        });

        let poller = Self {
            epoll,
            events: Vec::with_capacity(capacity.max(1)),
            waker,
        };
        poller.ctl(EPOLL_CTL_ADD, eventfd, WAKE_TOKEN, Interest::READ)?;

        Ok(poller)
    }

    #[cfg(test)]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.epoll
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Registers a descriptor for read readiness.
    pub(crate) fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, Interest::READ)
    }

    /// Removes a descriptor from the interest list.
    pub(crate) fn del(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    /// Replaces the interest set of a registered descriptor.
    pub(crate) fn enable(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    /// Blocks until at least one descriptor is ready, the waker fires,
    /// or `timeout` expires.
    ///
    /// Returns the number of raw OS events, including wake-ups; zero means
    /// the timeout expired. `EINTR` is reported as a single spurious wake.
    pub(crate) fn wait(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        // Rounded up so a sub-millisecond remainder still sleeps.
        let timeout_ms = timeout
            .map(|t| t.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(1);
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let flags = ev.events;
            push_merged(
                events,
                Event {
                    token: ev.u64,
                    readable: flags & EPOLLIN as u32 != 0,
                    writable: flags & EPOLLOUT as u32 != 0,
                    error: flags & EPOLLERR as u32 != 0,
                    eof: flags & EPOLLHUP as u32 != 0,
                },
            );
        }

        Ok(n as usize)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        sys_close(self.epoll);
    }
}
