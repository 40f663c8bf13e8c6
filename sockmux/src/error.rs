use crate::socket::SocketId;

use std::io;

use thiserror::Error;

/// Errors reported synchronously to the thread issuing a request.
///
/// Failures that happen later, on the reactor thread, are delivered as
/// [`SocketEvent::Error`](crate::SocketEvent::Error) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Every probed slot was occupied.
    #[error("socket id space exhausted")]
    IdExhausted,

    /// The reactor was dropped.
    #[error("reactor is closed")]
    Closed,

    /// The id does not name a live socket.
    #[error("invalid socket {0}")]
    InvalidSocket(SocketId),

    /// Host name resolution produced no usable address.
    #[error("cannot resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
