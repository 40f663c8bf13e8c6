//! Platform-specific readiness poller.
//!
//! The poller is used by the reactor to:
//! - register socket descriptors under their socket id,
//! - toggle write interest as write queues fill and drain,
//! - wait for readiness events,
//! - wake up when a producer thread submits a command.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;

pub(crate) use common::{Interest, Waker};

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub(crate) type Poller = kqueue::KqueuePoller;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) type Poller = epoll::EpollPoller;

pub(crate) mod unix;

pub(crate) use unix as platform;
