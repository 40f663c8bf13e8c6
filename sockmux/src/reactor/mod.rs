//! Reactor core and event dispatch.
//!
//! The reactor is the single owner of every socket. It is responsible for:
//! - applying commands submitted from any thread,
//! - waiting for readiness and performing non-blocking I/O,
//! - turning what happened into [`SocketEvent`](crate::SocketEvent)s.
//!
//! Producer threads talk to it through [`ReactorHandle`], which serializes
//! requests over a bounded command channel and wakes the poller.

mod core;
mod event;
mod handle;
mod poller;

pub(crate) mod command;

pub use self::core::Reactor;
pub use handle::ReactorHandle;
