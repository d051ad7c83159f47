//! Inbound QoS 2 dedup cache.
//!
//! The teacher's `MessageReceiver` keys a bare `HashMap<PacketId, Message>`
//! with no eviction at all. This extends that with a TTL per entry and
//! bounded capacity, evicting the soonest-to-expire entry when full, since a
//! session that never reconnects would otherwise grow the map unboundedly.

use std::collections::BTreeMap;
use std::collections::HashMap;

use mqtt_wire::PacketId;
use tokio::time::{Duration, Instant};

struct Entry {
    expires_at: Instant,
}

pub struct Dedup {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<PacketId, Entry>,
    /// Secondary index for O(log n) eviction of the soonest expiry. Multiple
    /// ids can share a deadline, hence the `Vec`.
    by_deadline: BTreeMap<Instant, Vec<PacketId>>,
}

impl Dedup {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Dedup {
            capacity,
            ttl,
            entries: HashMap::new(),
            by_deadline: BTreeMap::new(),
        }
    }

    fn remove(&mut self, packet_id: PacketId) {
        if let Some(entry) = self.entries.remove(&packet_id) {
            if let Some(ids) = self.by_deadline.get_mut(&entry.expires_at) {
                ids.retain(|id| *id != packet_id);
                if ids.is_empty() {
                    self.by_deadline.remove(&entry.expires_at);
                }
            }
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        let expired: Vec<Instant> = self.by_deadline.range(..=now).map(|(t, _)| *t).collect();
        for t in expired {
            if let Some(ids) = self.by_deadline.remove(&t) {
                for id in ids {
                    self.entries.remove(&id);
                }
            }
        }
    }

    fn evict_one_lru(&mut self) {
        if let Some((&deadline, _)) = self.by_deadline.iter().next() {
            if let Some(mut ids) = self.by_deadline.remove(&deadline) {
                if let Some(id) = ids.pop() {
                    self.entries.remove(&id);
                }
                if !ids.is_empty() {
                    self.by_deadline.insert(deadline, ids);
                }
            }
        }
    }

    /// `true` if an inbound QoS 2 Publish with this id has already been
    /// recorded and not yet expired — the caller must re-send PubRec but not
    /// redeliver the payload to the application.
    pub fn seen(&mut self, packet_id: PacketId, now: Instant) -> bool {
        self.evict_expired(now);
        self.entries.contains_key(&packet_id)
    }

    /// Records `packet_id` as seen, evicting the soonest-to-expire entry if
    /// at capacity.
    pub fn insert(&mut self, packet_id: PacketId, now: Instant) {
        self.evict_expired(now);
        if !self.entries.contains_key(&packet_id) && self.entries.len() >= self.capacity {
            self.evict_one_lru();
        }
        let expires_at = now + self.ttl;
        self.remove(packet_id);
        self.entries.insert(packet_id, Entry { expires_at });
        self.by_deadline.entry(expires_at).or_default().push(packet_id);
    }

    /// Removes `packet_id`, called on PUBREL receipt once PUBCOMP is sent.
    pub fn complete(&mut self, packet_id: PacketId) {
        self.remove(packet_id);
    }

    /// Drops every entry, used when a reconnect restarts the broker's view.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_deadline.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn duplicate_within_ttl_is_suppressed() {
        let mut dedup = Dedup::new(16, Duration::from_secs(5));
        let now = Instant::now();
        dedup.insert(7, now);
        assert!(dedup.seen(7, now));
    }

    #[tokio::test(start_paused = true)]
    async fn complete_removes_entry() {
        let mut dedup = Dedup::new(16, Duration::from_secs(5));
        let now = Instant::now();
        dedup.insert(7, now);
        dedup.complete(7);
        assert!(!dedup.seen(7, now));
        assert_eq!(dedup.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut dedup = Dedup::new(16, Duration::from_millis(50));
        let now = Instant::now();
        dedup.insert(7, now);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!dedup.seen(7, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_soonest_expiry_when_full() {
        let mut dedup = Dedup::new(2, Duration::from_secs(5));
        let t0 = Instant::now();
        dedup.insert(1, t0);
        tokio::time::advance(Duration::from_millis(10)).await;
        let t1 = Instant::now();
        dedup.insert(2, t1);
        tokio::time::advance(Duration::from_millis(10)).await;
        let t2 = Instant::now();
        dedup.insert(3, t2);

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.seen(1, t2));
        assert!(dedup.seen(2, t2));
        assert!(dedup.seen(3, t2));
    }
}
