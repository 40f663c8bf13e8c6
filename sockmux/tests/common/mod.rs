#![allow(dead_code)]

use sockmux::{Reactor, SocketEvent, SocketId};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Next result other than a queue warning. Panics after ten seconds.
pub fn next_event(reactor: &mut Reactor) -> SocketEvent {
    let deadline = Instant::now() + Duration::from_secs(10);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "Timed out waiting for a reactor event");

        match reactor.poll_timeout(Some(remaining)) {
            Some(SocketEvent::Warning { .. }) | None => continue,
            Some(event) => return event,
        }
    }
}

/// Every result produced until the reactor stays quiet for 100ms.
pub fn settle(reactor: &mut Reactor) -> Vec<SocketEvent> {
    let mut events = Vec::new();
    while let Some(event) = reactor.poll_timeout(Some(Duration::from_millis(100))) {
        events.push(event);
    }
    events
}

pub fn local_addr(reactor: &Reactor, id: SocketId) -> SocketAddr {
    reactor
        .info()
        .into_iter()
        .find(|info| info.id == id)
        .and_then(|info| info.local)
        .expect("Failed to find local address")
}
