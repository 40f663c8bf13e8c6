//! # sockmux
//!
//! **sockmux** is a single-threaded socket reactor: one thread owns every
//! socket and drives them through readiness polling (epoll on Linux,
//! kqueue on macOS and the BSDs), while any number of threads submit
//! requests through cheap, cloneable handles.
//!
//! It provides:
//!
//! - **TCP** connect, listen/accept and adoption of inherited descriptors
//! - **UDP** sockets with per-datagram or default destinations
//! - **Prioritized write queues**: high-priority buffers always go first,
//!   and a partially sent buffer is never overtaken
//! - **Opaque routing tokens** echoed back on every result
//!
//! Results are pulled one at a time with [`Reactor::poll`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sockmux::{Reactor, SocketEvent};
//!
//! let mut reactor = Reactor::new().expect("reactor");
//! let handle = reactor.handle();
//!
//! let id = handle.connect(7, "127.0.0.1", 6379).expect("connect");
//!
//! loop {
//!     match reactor.poll() {
//!         SocketEvent::Open { id: opened, .. } if opened == id => {
//!             handle.send(id, b"PING\r\n".to_vec()).expect("send");
//!         }
//!         SocketEvent::Data { data, .. } => {
//!             println!("{}", String::from_utf8_lossy(&data));
//!             handle.close(id, 7).expect("close");
//!         }
//!         SocketEvent::Close { .. } | SocketEvent::Error { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod builder;
mod error;
mod message;
mod reactor;
mod socket;

pub use builder::ReactorBuilder;
pub use error::{Error, Result};
pub use message::{SocketEvent, SocketInfo};
pub use reactor::{Reactor, ReactorHandle};
pub use socket::udp::{
    UDP_ADDRESS_V4_LEN, UDP_ADDRESS_V6_LEN, UdpDatagram, decode_udp_address, encode_udp_address,
};
pub use socket::write_buffer::Priority;
pub use socket::{Protocol, SocketId, SocketState};
