//! Encodes a [`Packet`] into a caller-provided, exactly-sized buffer.

use crate::error::EncodeError;
use crate::packet::*;
use crate::size::estimate;
use crate::varint::write_remaining_length;

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    fn put_u8(&mut self, b: u8) {
        self.buf[self.pos] = b;
        self.pos += 1;
    }

    fn put_u16(&mut self, n: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&n.to_be_bytes());
        self.pos += 2;
    }

    fn put_slice(&mut self, s: &[u8]) {
        self.buf[self.pos..self.pos + s.len()].copy_from_slice(s);
        self.pos += s.len();
    }

    fn put_str(&mut self, s: &str) {
        self.put_u16(s.len() as u16);
        self.put_slice(s.as_bytes());
    }

    fn put_binary(&mut self, b: &[u8]) {
        self.put_u16(b.len() as u16);
        self.put_slice(b);
    }

    fn put_varint(&mut self, n: usize) {
        let written = write_remaining_length(n, &mut self.buf[self.pos..]);
        self.pos += written;
    }
}

fn packet_type(packet: &Packet<'_>) -> Type {
    match packet {
        Packet::Connect(_) => Type::CONNECT,
        Packet::ConnectAck(_) => Type::CONNACK,
        Packet::Publish(_) => Type::PUBLISH,
        Packet::PublishAck(_) => Type::PUBACK,
        Packet::PublishReceived(_) => Type::PUBREC,
        Packet::PublishRelease(_) => Type::PUBREL,
        Packet::PublishComplete(_) => Type::PUBCOMP,
        Packet::Subscribe(_) => Type::SUBSCRIBE,
        Packet::SubscribeAck(_) => Type::SUBACK,
        Packet::Unsubscribe(_) => Type::UNSUBSCRIBE,
        Packet::UnsubscribeAck(_) => Type::UNSUBACK,
        Packet::Ping => Type::PINGREQ,
        Packet::Pong => Type::PINGRESP,
        Packet::Disconnect => Type::DISCONNECT,
    }
}

fn packet_flags(packet: &Packet<'_>) -> u8 {
    match packet {
        Packet::Publish(p) => p.flags().bits(),
        Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
        _ => 0,
    }
}

fn check_str(name: &'static str, s: &str) -> Result<(), EncodeError> {
    if s.len() > u16::MAX as usize {
        return Err(EncodeError::FieldTooLong(name, s.len()));
    }
    Ok(())
}

fn check_bin(name: &'static str, b: &[u8]) -> Result<(), EncodeError> {
    if b.len() > u16::MAX as usize {
        return Err(EncodeError::FieldTooLong(name, b.len()));
    }
    Ok(())
}

/// Rejects any string/binary field too long for the 16-bit wire length
/// prefix before a single byte is written, so `put_str`/`put_binary` never
/// have to truncate.
fn check_lengths(packet: &Packet<'_>) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(c) => {
            check_str("client_id", c.client_id)?;
            if let Some(ref will) = c.last_will {
                check_str("will.topic", will.topic)?;
                check_bin("will.message", will.message)?;
            }
            if let Some(username) = c.username {
                check_str("username", username)?;
            }
            if let Some(password) = c.password {
                check_bin("password", password)?;
            }
        }
        Packet::Publish(p) => {
            check_str("topic", p.topic)?;
        }
        Packet::Subscribe(s) => {
            for (filter, _) in &s.subscriptions {
                check_str("topic_filter", filter)?;
            }
        }
        Packet::Unsubscribe(u) => {
            for filter in &u.topic_filters {
                check_str("topic_filter", filter)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Encodes `packet` into `buf`, which must be exactly `estimate(packet).total_size`
/// bytes. Returns the number of bytes written (always `buf.len()` on success).
pub fn encode(packet: &Packet<'_>, buf: &mut [u8]) -> Result<usize, EncodeError> {
    check_lengths(packet)?;

    let est = estimate(packet);
    if buf.len() != est.total_size {
        return Err(EncodeError::BufferSizeMismatch(buf.len(), est.total_size));
    }

    let mut w = Writer::new(buf);
    w.put_u8((packet_type(packet) as u8) << 4 | packet_flags(packet));
    w.put_varint(est.body_size);

    match packet {
        Packet::Connect(c) => encode_connect(&mut w, c),
        Packet::ConnectAck(c) => encode_connect_ack(&mut w, c),
        Packet::Publish(p) => encode_publish(&mut w, p),
        Packet::PublishAck(p) => w.put_u16(p.packet_id),
        Packet::PublishReceived(p) => w.put_u16(p.packet_id),
        Packet::PublishRelease(p) => w.put_u16(p.packet_id),
        Packet::PublishComplete(p) => w.put_u16(p.packet_id),
        Packet::Subscribe(s) => encode_subscribe(&mut w, s),
        Packet::SubscribeAck(s) => encode_subscribe_ack(&mut w, s),
        Packet::Unsubscribe(u) => encode_unsubscribe(&mut w, u),
        Packet::UnsubscribeAck(u) => w.put_u16(u.packet_id),
        Packet::Ping | Packet::Pong | Packet::Disconnect => {}
    }

    debug_assert_eq!(w.pos, est.total_size);
    Ok(w.pos)
}

fn encode_connect(w: &mut Writer<'_>, c: &Connect<'_>) {
    w.put_slice(PROTOCOL_NAME);
    w.put_u8(PROTOCOL_LEVEL);

    let mut flags = ConnectFlags::empty();
    if c.clean_session {
        flags |= ConnectFlags::CLEAN_SESSION;
    }
    if let Some(ref will) = c.last_will {
        flags |= ConnectFlags::LAST_WILL;
        flags |= ConnectFlags::from(will.qos);
        if will.retain {
            flags |= ConnectFlags::WILL_RETAIN;
        }
    }
    if c.username.is_some() {
        flags |= ConnectFlags::USERNAME;
    }
    if c.password.is_some() {
        flags |= ConnectFlags::PASSWORD;
    }
    w.put_u8(flags.bits());
    w.put_u16(c.keep_alive);

    w.put_str(c.client_id);
    if let Some(ref will) = c.last_will {
        w.put_str(will.topic);
        w.put_binary(will.message);
    }
    if let Some(username) = c.username {
        w.put_str(username);
    }
    if let Some(password) = c.password {
        w.put_binary(password);
    }
}

fn encode_connect_ack(w: &mut Writer<'_>, c: &ConnectAck) {
    let mut flags = ConnectAckFlags::empty();
    if c.session_present {
        flags |= ConnectAckFlags::SESSION_PRESENT;
    }
    w.put_u8(flags.bits());
    w.put_u8(c.return_code as u8);
}

fn encode_publish(w: &mut Writer<'_>, p: &Publish<'_>) {
    w.put_str(p.topic);
    if let Some(packet_id) = p.packet_id {
        w.put_u16(packet_id);
    }
    w.put_slice(p.payload);
}

fn encode_subscribe(w: &mut Writer<'_>, s: &Subscribe<'_>) {
    w.put_u16(s.packet_id);
    for (filter, qos) in &s.subscriptions {
        w.put_str(filter);
        w.put_u8(*qos as u8);
    }
}

fn encode_subscribe_ack(w: &mut Writer<'_>, s: &SubscribeAck) {
    w.put_u16(s.packet_id);
    for code in &s.status {
        w.put_u8((*code).into());
    }
}

fn encode_unsubscribe(w: &mut Writer<'_>, u: &Unsubscribe<'_>) {
    w.put_u16(u.packet_id);
    for filter in &u.topic_filters {
        w.put_str(filter);
    }
}

/// Encodes `packet` into a freshly allocated, exactly-sized `Vec<u8>`.
pub fn encode_to_vec(packet: &Packet<'_>) -> Vec<u8> {
    let est = estimate(packet);
    let mut buf = vec![0u8; est.total_size];
    encode(packet, &mut buf).expect("buffer sized from the same estimate");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_qos0_publish_to_the_documented_bytes() {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/b",
            packet_id: None,
            payload: &[0x01, 0x02],
        });

        let bytes = encode_to_vec(&packet);
        assert_eq!(
            bytes,
            vec![0x30, 0x05, 0x00, 0x03, b'a', b'/', b'b', 0x01, 0x02]
        );
    }

    #[test]
    fn rejects_mismatched_buffer_size() {
        let packet = Packet::Ping;
        let mut buf = [0u8; 1];
        assert_eq!(encode(&packet, &mut buf), Err(EncodeError::BufferSizeMismatch(1, 2)));
    }

    #[test]
    fn rejects_topic_over_u16_max_instead_of_truncating() {
        let topic = "a".repeat(u16::MAX as usize + 1);
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: &topic,
            packet_id: None,
            payload: &[],
        });
        let est = estimate(&packet);
        let mut buf = vec![0u8; est.total_size];
        assert_eq!(
            encode(&packet, &mut buf),
            Err(EncodeError::FieldTooLong("topic", topic.len()))
        );
    }
}
