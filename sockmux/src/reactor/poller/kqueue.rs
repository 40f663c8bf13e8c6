//! BSD/macOS `kqueue`-based poller.
//!
//! Mirrors the epoll backend. Read and write readiness are separate
//! filters in kqueue, so `enable` adds or deletes the write filter while
//! the read filter stays registered for the lifetime of the descriptor.

use super::common::{Interest, Waker};
use super::platform::{sys_close, sys_pipe};
use crate::reactor::event::{Event, push_merged};

use libc::{
    EV_ADD, EV_DELETE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent, kqueue, timespec,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Reserved token for the wake-up pipe.
const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct KqueuePoller {
    kq: RawFd,
    events: Vec<libc::kevent>,
    waker: Arc<Waker>,
}

// `kevent::udata` is a raw pointer, but only ever holds a token.
unsafe impl Send for KqueuePoller {}

fn change(fd: RawFd, filter: i16, flags: u16, token: u64) -> libc::kevent {
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = fd as _;
    ev.filter = filter as _;
    ev.flags = flags as _;
    ev.udata = token as usize as *mut _;
    ev
}

impl KqueuePoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let (read, write) = match sys_pipe() {
            Ok(pair) => pair,
            Err(e) => {
                sys_close(kq);
                return Err(e);
            }
        };

        let poller = Self {
            kq,
            events: Vec::with_capacity(capacity.max(1)),
            waker: Arc::new(Waker { read, write }),
        };
        poller.apply(&[change(read, EVFILT_READ, EV_ADD, WAKE_TOKEN)])?;

        Ok(poller)
    }

    #[cfg(test)]
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.kq
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let rc = unsafe {
            kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as _,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Registers a descriptor for read readiness.
    pub(crate) fn add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.apply(&[change(fd, EVFILT_READ, EV_ADD, token)])
    }

    /// Removes both filters of a descriptor.
    pub(crate) fn del(&self, fd: RawFd) {
        let _ = self.apply(&[change(fd, EVFILT_READ, EV_DELETE, 0)]);
        let _ = self.apply(&[change(fd, EVFILT_WRITE, EV_DELETE, 0)]);
    }

    /// Toggles the write filter; the read filter follows `interest.read`.
    pub(crate) fn enable(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let read = if interest.read { EV_ADD } else { EV_DELETE };
        self.apply(&[change(fd, EVFILT_READ, read, token)])?;

        if interest.write {
            self.apply(&[change(fd, EVFILT_WRITE, EV_ADD, token)])
        } else {
            // Deleting a filter that was never added reports ENOENT.
            let _ = self.apply(&[change(fd, EVFILT_WRITE, EV_DELETE, token)]);
            Ok(())
        }
    }

    /// See `EpollPoller::wait`.
    pub(crate) fn wait(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let ts = timeout.map(|t| timespec {
            tv_sec: t.as_secs() as _,
            tv_nsec: t.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const timespec)
            .unwrap_or(std::ptr::null());

        events.clear();

        let n = unsafe {
            kevent(
                self.kq,
                std::ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.capacity() as _,
                ts_ptr,
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
            let token = ev.udata as usize as u64;
            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            let filter = ev.filter as i16;
            let flags = ev.flags as u16;
            push_merged(
                events,
                Event {
                    token,
                    readable: filter == EVFILT_READ,
                    writable: filter == EVFILT_WRITE,
                    error: flags & EV_ERROR != 0,
                    eof: flags & EV_EOF != 0,
                },
            );
        }

        Ok(n as usize)
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        sys_close(self.kq);
    }
}
