/// A readiness event reported by the poller.
///
/// Events for the same token within one `wait()` batch are merged, so
/// a socket appears at most once per batch.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    /// Token supplied when the descriptor was registered (the socket id).
    pub(crate) token: u64,

    /// The descriptor is readable.
    pub(crate) readable: bool,

    /// The descriptor is writable.
    pub(crate) writable: bool,

    /// The descriptor reported an error condition.
    pub(crate) error: bool,

    /// The peer hung up.
    pub(crate) eof: bool,
}

impl Event {
    /// Folds the flags of `other` into this event.
    pub(crate) fn merge(&mut self, other: &Event) {
        self.readable |= other.readable;
        self.writable |= other.writable;
        self.error |= other.error;
        self.eof |= other.eof;
    }
}

/// Appends `event` to the batch, merging it with an earlier event for the
/// same token.
pub(crate) fn push_merged(events: &mut Vec<Event>, event: Event) {
    if let Some(e) = events.iter_mut().find(|e| e.token == event.token) {
        e.merge(&event);
    } else {
        events.push(event);
    }
}
