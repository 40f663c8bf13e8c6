//! Lock-free id allocator over a fixed table of socket slots.
//!
//! The table is the only socket state shared between producer threads and
//! the poller thread. Producers reserve ids; everything else about a
//! socket lives in the poller's own table.

use super::SocketId;

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Ids live in the non-negative 31-bit range.
const ID_MASK: u32 = 0x7fff_ffff;

/// Occupancy of a slot, as seen by every thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SlotState {
    /// Free for reservation.
    Invalid = 0,
    /// Claimed by a producer; the creating command has not been applied yet.
    Reserve = 1,
    /// Holds a socket owned by the poller.
    Live = 2,
}

impl SlotState {
    fn from_u8(v: u8) -> SlotState {
        match v {
            1 => SlotState::Reserve,
            2 => SlotState::Live,
            _ => SlotState::Invalid,
        }
    }
}

pub(crate) struct SlotTable {
    next_id: AtomicU32,
    slots: Box<[AtomicU8]>,
}

impl SlotTable {
    pub(crate) fn new(size: usize) -> Self {
        assert!(size > 0, "slot table must not be empty");

        Self {
            next_id: AtomicU32::new(0),
            slots: (0..size).map(|_| AtomicU8::new(SlotState::Invalid as u8)).collect(),
        }
    }

    /// Maps an id to its slot index.
    pub(crate) fn slot_of(&self, id: SocketId) -> usize {
        id.as_u32() as usize % self.slots.len()
    }

    /// Claims a fresh id whose slot is free.
    ///
    /// Each attempt draws a new id, so at most `len()` slots are probed.
    /// On success the slot is in [`SlotState::Reserve`]; `None` means every
    /// probed slot was occupied.
    pub(crate) fn reserve(&self) -> Option<SocketId> {
        for _ in 0..self.slots.len() {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) & ID_MASK;
            let slot = &self.slots[id as usize % self.slots.len()];

            if slot
                .compare_exchange(
                    SlotState::Invalid as u8,
                    SlotState::Reserve as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(SocketId::new(id));
            }
        }

        None
    }

    /// Marks a reserved slot as holding a live socket.
    pub(crate) fn occupy(&self, id: SocketId) {
        self.slots[self.slot_of(id)].store(SlotState::Live as u8, Ordering::Release);
    }

    /// Returns a slot to the free pool.
    pub(crate) fn release(&self, id: SocketId) {
        self.slots[self.slot_of(id)].store(SlotState::Invalid as u8, Ordering::Release);
    }

    pub(crate) fn state(&self, id: SocketId) -> SlotState {
        SlotState::from_u8(self.slots[self.slot_of(id)].load(Ordering::Acquire))
    }

    #[cfg(test)]
    fn set_next_id(&self, id: u32) {
        self.next_id.store(id, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reserve_claims_consecutive_free_slots() {
        let table = SlotTable::new(8);

        let a = table.reserve().unwrap();
        let b = table.reserve().unwrap();

        assert_ne!(a, b);
        assert_eq!(table.state(a), SlotState::Reserve);
        assert_eq!(table.state(b), SlotState::Reserve);
    }

    #[test]
    fn reserve_skips_occupied_slots() {
        let table = SlotTable::new(4);

        let first = table.reserve().unwrap();
        table.occupy(first);

        // Walk the counter back onto the occupied slot.
        table.set_next_id(4);
        let next = table.reserve().unwrap();

        assert_ne!(table.slot_of(next), table.slot_of(first));
        assert_eq!(table.state(first), SlotState::Live);
    }

    #[test]
    fn reserve_reports_exhaustion() {
        let table = SlotTable::new(3);

        for _ in 0..3 {
            assert!(table.reserve().is_some());
        }
        assert!(table.reserve().is_none());
    }

    #[test]
    fn released_slot_is_reusable_under_a_new_id() {
        let table = SlotTable::new(2);

        let a = table.reserve().unwrap();
        let b = table.reserve().unwrap();
        table.release(a);

        let c = table.reserve().unwrap();
        assert_eq!(table.slot_of(c), table.slot_of(a));
        assert_ne!(c, a);
        assert_eq!(table.state(b), SlotState::Reserve);
    }

    #[test]
    fn ids_stay_non_negative_across_wraparound() {
        let table = SlotTable::new(4);
        table.set_next_id(u32::MAX);

        let a = table.reserve().unwrap();
        let b = table.reserve().unwrap();

        assert_eq!(a.as_u32(), ID_MASK);
        assert_eq!(b.as_u32(), 0);
    }

    #[test]
    fn concurrent_reservations_are_unique_and_reserved() {
        let table = Arc::new(SlotTable::new(1024));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|_| {
                            let id = table.reserve().expect("table has room");
                            assert_eq!(table.state(id), SlotState::Reserve);
                            id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut slots = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("Thread panicked") {
                assert!(seen.insert(id), "duplicate id {id}");
                assert!(slots.insert(table.slot_of(id)), "slot shared by two ids");
                assert_eq!(table.state(id), SlotState::Reserve);
            }
        }

        assert_eq!(seen.len(), 800);
    }
}
