//! Outbound QoS≥1 delivery tracking.
//!
//! Generalizes the teacher's `MessageSender` (a `Slab<SendState>` keyed by
//! packet-id, with `Sending`/`Received` states and `on_publish_ack`/
//! `on_publish_received`/`on_publish_complete` transitions) into a registry
//! with retry deadlines and a completion signal per publish, since a single
//! session worker here juggles many publishes concurrently rather than
//! blocking the caller's thread on each one.

use std::collections::HashMap;
use std::time::Duration;

use mqtt_wire::{OwnedPublish, PacketId};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::Result;

/// Result delivered to the caller that issued a QoS≥1 publish.
#[derive(Debug)]
pub enum PublishOutcome {
    Delivered,
    TimedOut,
    Disconnected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingPubAck,
    AwaitingPubRec,
    AwaitingPubComp,
}

struct Entry {
    publish: OwnedPublish,
    phase: Phase,
    attempts: u32,
    deadline: Instant,
    completion: oneshot::Sender<Result<PublishOutcome>>,
}

/// What the caller must do on the wire as a result of a registry transition.
pub enum RetryAction {
    /// Resend the publish itself, with `dup` forced true.
    ResendPublish(PacketId, OwnedPublish),
    /// Resend PUBREL for a publish already past the PUBREC handshake.
    ResendPubRel(PacketId),
}

pub struct Inflight {
    entries: HashMap<PacketId, Entry>,
    max_retries: u32,
    publish_timeout: Duration,
}

impl Inflight {
    pub fn new(max_retries: u32, publish_timeout: Duration) -> Self {
        Inflight {
            entries: HashMap::new(),
            max_retries,
            publish_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.entries.contains_key(&packet_id)
    }

    /// Ids currently inflight, for replaying after a non-clean reconnect.
    pub fn ids(&self) -> impl Iterator<Item = PacketId> + '_ {
        self.entries.keys().copied()
    }

    pub fn register(
        &mut self,
        packet_id: PacketId,
        publish: OwnedPublish,
        completion: oneshot::Sender<Result<PublishOutcome>>,
    ) {
        let phase = match publish.qos {
            mqtt_wire::QoS::ExactlyOnce => Phase::AwaitingPubRec,
            _ => Phase::AwaitingPubAck,
        };
        self.entries.insert(
            packet_id,
            Entry {
                publish,
                phase,
                attempts: 1,
                deadline: Instant::now() + self.publish_timeout,
                completion,
            },
        );
    }

    pub fn on_pub_ack(&mut self, packet_id: PacketId) -> bool {
        match self.entries.get(&packet_id) {
            Some(entry) if entry.phase == Phase::AwaitingPubAck => {
                let entry = self.entries.remove(&packet_id).unwrap();
                let _ = entry.completion.send(Ok(PublishOutcome::Delivered));
                true
            }
            _ => false,
        }
    }

    /// Returns the PUBREL to send on the wire, or `None` if `packet_id` is
    /// unknown (ignored, per §4.3: stray acks are not an error).
    pub fn on_pub_rec(&mut self, packet_id: PacketId) -> Option<RetryAction> {
        let entry = self.entries.get_mut(&packet_id)?;
        match entry.phase {
            Phase::AwaitingPubRec | Phase::AwaitingPubComp => {
                entry.phase = Phase::AwaitingPubComp;
                entry.deadline = Instant::now() + self.publish_timeout;
                Some(RetryAction::ResendPubRel(packet_id))
            }
            Phase::AwaitingPubAck => None,
        }
    }

    pub fn on_pub_comp(&mut self, packet_id: PacketId) -> bool {
        match self.entries.get(&packet_id) {
            Some(entry) if entry.phase == Phase::AwaitingPubComp => {
                let entry = self.entries.remove(&packet_id).unwrap();
                let _ = entry.completion.send(Ok(PublishOutcome::Delivered));
                true
            }
            _ => false,
        }
    }

    /// Advances entries past their retry deadline: resends or fails them.
    pub fn poll_retries(&mut self, now: Instant) -> Vec<RetryAction> {
        let mut actions = Vec::new();
        let expired: Vec<PacketId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for packet_id in expired {
            let entry = self.entries.get_mut(&packet_id).unwrap();
            if entry.attempts < self.max_retries {
                entry.attempts += 1;
                entry.deadline = now + self.publish_timeout;
                match entry.phase {
                    Phase::AwaitingPubAck | Phase::AwaitingPubRec => {
                        let mut publish = entry.publish.clone();
                        publish.dup = true;
                        actions.push(RetryAction::ResendPublish(packet_id, publish));
                    }
                    Phase::AwaitingPubComp => {
                        actions.push(RetryAction::ResendPubRel(packet_id));
                    }
                }
            } else {
                let entry = self.entries.remove(&packet_id).unwrap();
                let _ = entry.completion.send(Ok(PublishOutcome::TimedOut));
            }
        }
        actions
    }

    /// Fails every outstanding entry, e.g. on session teardown.
    pub fn fail_all(&mut self, outcome_for: impl Fn() -> PublishOutcome) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.completion.send(Ok(outcome_for()));
        }
    }

    /// Marks every entry as awaiting its first retransmission, used after a
    /// non-clean reconnect: the next `poll_retries` resends all of them with DUP=1.
    pub fn arm_for_replay(&mut self, now: Instant) {
        for entry in self.entries.values_mut() {
            entry.deadline = now;
        }
    }

    /// Extracts every outstanding entry, discarding phase and retry
    /// bookkeeping. Used after a reconnect where the broker has no memory of
    /// the previous session: the caller re-registers each returned publish
    /// under a freshly allocated packet id instead of replaying the old one.
    pub fn drain(&mut self) -> Vec<(OwnedPublish, oneshot::Sender<Result<PublishOutcome>>)> {
        self.entries
            .drain()
            .map(|(_, entry)| (entry.publish, entry.completion))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_wire::QoS;

    fn sample_publish(qos: QoS) -> OwnedPublish {
        OwnedPublish {
            dup: false,
            qos,
            retain: false,
            topic: "a/b".to_owned(),
            packet_id: Some(1),
            payload: bytes::Bytes::from_static(b"hi"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ack_completes_qos1() {
        let mut inflight = Inflight::new(3, Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        inflight.register(1, sample_publish(QoS::AtLeastOnce), tx);
        assert!(inflight.on_pub_ack(1));
        assert_eq!(inflight.len(), 0);
        assert!(matches!(rx.await.unwrap().unwrap(), PublishOutcome::Delivered));
    }

    #[tokio::test(start_paused = true)]
    async fn qos2_handshake_through_pubcomp() {
        let mut inflight = Inflight::new(3, Duration::from_secs(5));
        let (tx, rx) = oneshot::channel();
        inflight.register(7, sample_publish(QoS::ExactlyOnce), tx);
        assert!(matches!(inflight.on_pub_rec(7), Some(RetryAction::ResendPubRel(7))));
        assert!(inflight.on_pub_comp(7));
        assert!(matches!(rx.await.unwrap().unwrap(), PublishOutcome::Delivered));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_ack_is_ignored() {
        let mut inflight = Inflight::new(3, Duration::from_secs(5));
        assert!(!inflight.on_pub_ack(99));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_timeout() {
        let mut inflight = Inflight::new(2, Duration::from_millis(10));
        let (tx, rx) = oneshot::channel();
        inflight.register(1, sample_publish(QoS::AtLeastOnce), tx);

        tokio::time::advance(Duration::from_millis(11)).await;
        let actions = inflight.poll_retries(Instant::now());
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], RetryAction::ResendPublish(1, p) if p.dup));

        tokio::time::advance(Duration::from_millis(11)).await;
        let actions = inflight.poll_retries(Instant::now());
        assert!(actions.is_empty());
        assert_eq!(inflight.len(), 0);
        assert!(matches!(rx.await.unwrap().unwrap(), PublishOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_returns_owned_publishes_for_re_registration() {
        let mut inflight = Inflight::new(3, Duration::from_secs(5));
        let (tx, _rx) = oneshot::channel();
        inflight.register(1, sample_publish(QoS::AtLeastOnce), tx);

        let drained = inflight.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0.packet_id, Some(1));
        assert_eq!(inflight.len(), 0);
    }
}
