//! Pure size estimation, used to preallocate exact-size encode buffers.
//!
//! None of these functions allocate; they only compute lengths from the
//! packet's own borrowed fields.

use crate::packet::*;
use crate::varint::size_of_remaining_length;

/// `(body_size, header_size, total_size)` for a packet, computed without
/// allocating or encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeEstimate {
    /// Size of the variable header plus payload (the MQTT "remaining length").
    pub body_size: usize,
    /// Size of the fixed header: 1 type/flags byte plus the remaining-length varint.
    pub header_size: usize,
    /// `body_size + header_size`, the exact buffer size `encode` requires.
    pub total_size: usize,
}

fn utf8_str_size(s: &str) -> usize {
    2 + s.len()
}

fn binary_size(b: &[u8]) -> usize {
    2 + b.len()
}

fn body_size(packet: &Packet<'_>) -> usize {
    match packet {
        Packet::Connect(c) => connect_body_size(c),
        Packet::ConnectAck(_) => 2,
        Packet::Publish(p) => publish_body_size(p),
        Packet::PublishAck(_)
        | Packet::PublishReceived(_)
        | Packet::PublishRelease(_)
        | Packet::PublishComplete(_)
        | Packet::UnsubscribeAck(_) => 2,
        Packet::Subscribe(s) => subscribe_body_size(s),
        Packet::SubscribeAck(s) => 2 + s.status.len(),
        Packet::Unsubscribe(u) => unsubscribe_body_size(u),
        Packet::Ping | Packet::Pong | Packet::Disconnect => 0,
    }
}

fn connect_body_size(c: &Connect<'_>) -> usize {
    let mut n = PROTOCOL_NAME.len() + 1 /* level */ + 1 /* flags */ + 2 /* keep_alive */;
    n += utf8_str_size(c.client_id);
    if let Some(ref will) = c.last_will {
        n += utf8_str_size(will.topic);
        n += binary_size(will.message);
    }
    if let Some(username) = c.username {
        n += utf8_str_size(username);
    }
    if let Some(password) = c.password {
        n += binary_size(password);
    }
    n
}

fn publish_body_size(p: &Publish<'_>) -> usize {
    let mut n = utf8_str_size(p.topic);
    if p.qos != QoS::AtMostOnce {
        n += 2;
    }
    n += p.payload.len();
    n
}

fn subscribe_body_size(s: &Subscribe<'_>) -> usize {
    let mut n = 2;
    for (filter, _qos) in &s.subscriptions {
        n += utf8_str_size(filter) + 1;
    }
    n
}

fn unsubscribe_body_size(u: &Unsubscribe<'_>) -> usize {
    let mut n = 2;
    for filter in &u.topic_filters {
        n += utf8_str_size(filter);
    }
    n
}

/// Computes `(body_size, header_size, total_size)` for `packet`.
pub fn estimate(packet: &Packet<'_>) -> SizeEstimate {
    let body_size = body_size(packet);
    let header_size = 1 + size_of_remaining_length(body_size);
    SizeEstimate {
        body_size,
        header_size,
        total_size: header_size + body_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos0_publish_matches_hand_count() {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/b",
            packet_id: None,
            payload: &[0x01, 0x02],
        });

        let est = estimate(&packet);
        // fixed header (1) + remaining-length varint (1) + topic (2+3) + payload (2)
        assert_eq!(est.header_size, 2);
        assert_eq!(est.body_size, 7);
        assert_eq!(est.total_size, 9);
    }

    #[test]
    fn qos1_publish_includes_packet_id() {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "a",
            packet_id: Some(1),
            payload: &[0u8; 10],
        });

        let est = estimate(&packet);
        assert_eq!(est.body_size, 2 + 1 + 2 + 10);
    }

    #[test]
    fn ping_has_empty_body() {
        let est = estimate(&Packet::Ping);
        assert_eq!(est.body_size, 0);
        assert_eq!(est.header_size, 2);
        assert_eq!(est.total_size, 2);
    }
}
