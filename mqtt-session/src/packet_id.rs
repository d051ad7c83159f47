//! Rolling packet-id allocator.
//!
//! Generalizes the teacher's `AtomicU16` counter (`Session::next_packet_id`,
//! a bare `fetch_add`) to skip ids that are currently inflight and to wrap
//! from 65535 back to 1, since under sustained QoS≥1 traffic a bare
//! wraparound would eventually collide with a still-outstanding id.

use mqtt_wire::PacketId;

/// Per-session packet-id counter. Not `Sync`: the session worker is the only
/// task that ever allocates ids, so plain interior mutability is enough.
pub struct PacketIdAllocator {
    last: std::cell::Cell<PacketId>,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        PacketIdAllocator {
            last: std::cell::Cell::new(0),
        }
    }

    /// Returns the next id not currently held by `is_inflight`, or `None` if
    /// all 65535 nonzero ids are inflight.
    pub fn next(&self, is_inflight: impl Fn(PacketId) -> bool) -> Option<PacketId> {
        let start = self.last.get();
        let mut candidate = start;
        for _ in 0..u16::MAX {
            candidate = if candidate == u16::MAX { 1 } else { candidate + 1 };
            if !is_inflight(candidate) {
                self.last.set(candidate);
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn skips_zero_on_first_call() {
        let alloc = PacketIdAllocator::new();
        let id = alloc.next(|_| false).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn skips_inflight_ids() {
        let alloc = PacketIdAllocator::new();
        let inflight: HashSet<PacketId> = [1, 2, 3].iter().copied().collect();
        let id = alloc.next(|id| inflight.contains(&id)).unwrap();
        assert_eq!(id, 4);
    }

    #[test]
    fn wraps_from_max_to_one() {
        let alloc = PacketIdAllocator::new();
        alloc.next(|_| false); // -> 1
        alloc.last.set(u16::MAX);
        let id = alloc.next(|_| false).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn returns_none_when_fully_saturated() {
        let alloc = PacketIdAllocator::new();
        assert_eq!(alloc.next(|_| true), None);
    }
}
