use super::platform::{sys_close, sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;

/// Readiness interest for a registered descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };
}

/// Wake-up signal for a blocked poller.
///
/// On Linux both ends are the same `eventfd`; elsewhere they are the two
/// ends of a non-blocking pipe. The poller registers `read`; producer
/// threads only ever touch `write`.
pub(crate) struct Waker {
    pub(crate) read: RawFd,
    pub(crate) write: RawFd,
}

impl Waker {
    /// Wake the poller.
    ///
    /// A full pipe or a saturated eventfd counter already guarantees a
    /// pending wake-up, so `EAGAIN` is ignored.
    pub(crate) fn wake(&self) {
        let buf = 1u64.to_ne_bytes();
        let _ = sys_write(self.write, &buf);
    }

    /// Consume every pending wake-up.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];

        loop {
            match sys_read(self.read, &mut buf) {
                Ok(n) if n > 0 => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                _ => break,
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.read);
        if self.write != self.read {
            sys_close(self.write);
        }
    }
}
