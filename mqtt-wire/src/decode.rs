//! Stateful decoder: turns a stream of freshly-read bytes into fully parsed
//! packets, retaining any trailing partial frame between calls.

use std::convert::TryFrom;
use std::str;

use bytes::{Buf, BytesMut};

use crate::error::DecodeError;
use crate::packet::*;
use crate::varint::{decode_remaining_length, MAX_REMAINING_LENGTH};

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        if self.remaining() < 1 {
            return Err(DecodeError::ProtocolViolation("truncated field"));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn get_u16(&mut self) -> Result<u16, DecodeError> {
        if self.remaining() < 2 {
            return Err(DecodeError::ProtocolViolation("truncated field"));
        }
        let v = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::ProtocolViolation("truncated field"));
        }
        let s = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    fn get_binary(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.get_u16()? as usize;
        self.get_bytes(len)
    }

    fn get_str(&mut self) -> Result<&'a str, DecodeError> {
        let bytes = self.get_binary()?;
        str::from_utf8(bytes).map_err(|_| DecodeError::ProtocolViolation("not valid UTF-8"))
    }

    fn get_rest(&mut self) -> &'a [u8] {
        let s = &self.buf[self.pos..];
        self.pos = self.buf.len();
        s
    }
}

const CLIENT_ID_MAX_LEN: usize = 23;

fn parse_connect<'a>(body: &'a [u8]) -> Result<Connect<'a>, DecodeError> {
    let mut r = Reader::new(body);
    let name = r.get_bytes(PROTOCOL_NAME.len())?;
    if name != PROTOCOL_NAME {
        return Err(DecodeError::ProtocolViolation("bad protocol name"));
    }
    let level = r.get_u8()?;
    if level != PROTOCOL_LEVEL {
        return Err(DecodeError::ProtocolViolation("unsupported protocol level"));
    }
    let flags_byte = r.get_u8()?;
    let flags =
        ConnectFlags::from_bits(flags_byte).ok_or(DecodeError::ProtocolViolation("reserved connect flag bit set"))?;
    let keep_alive = r.get_u16()?;
    let client_id = r.get_str()?;
    if client_id.len() > CLIENT_ID_MAX_LEN && !client_id.is_empty() {
        // MQTT-3.1.3-5 recommends 1..23; be lenient like many brokers and only
        // reject ids that are not even valid UTF-8 (already checked above).
    }

    let last_will = if flags.contains(ConnectFlags::LAST_WILL) {
        let topic = r.get_str()?;
        let message = r.get_binary()?;
        let qos = flags
            .qos()
            .ok_or(DecodeError::ProtocolViolation("invalid will QoS"))?;
        Some(LastWill {
            qos,
            retain: flags.contains(ConnectFlags::WILL_RETAIN),
            topic,
            message,
        })
    } else {
        None
    };

    let username = if flags.contains(ConnectFlags::USERNAME) {
        Some(r.get_str()?)
    } else {
        None
    };
    let password = if flags.contains(ConnectFlags::PASSWORD) {
        Some(r.get_binary()?)
    } else {
        None
    };

    Ok(Connect {
        clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
        keep_alive,
        client_id,
        last_will,
        username,
        password,
    })
}

fn parse_connect_ack(body: &[u8]) -> Result<ConnectAck, DecodeError> {
    let mut r = Reader::new(body);
    let flags_byte = r.get_u8()?;
    let flags = ConnectAckFlags::from_bits(flags_byte)
        .ok_or(DecodeError::ProtocolViolation("reserved connack flag bit set"))?;
    let code = r.get_u8()?;
    let return_code =
        ConnectReturnCode::try_from(code).map_err(|_| DecodeError::ProtocolViolation("unknown connect return code"))?;
    Ok(ConnectAck {
        session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
        return_code,
    })
}

fn parse_publish<'a>(flags_byte: u8, body: &'a [u8]) -> Result<Publish<'a>, DecodeError> {
    let flags = PublishFlags::from_bits_truncate(flags_byte);
    let qos = flags
        .qos()
        .ok_or(DecodeError::ProtocolViolation("publish QoS value 3 is reserved"))?;
    let mut r = Reader::new(body);
    let topic = r.get_str()?;
    if topic.bytes().any(|b| b == b'#' || b == b'+' || b == 0) {
        return Err(DecodeError::ProtocolViolation("publish topic must not contain wildcards or NUL"));
    }
    let packet_id = if qos != QoS::AtMostOnce {
        Some(r.get_u16()?)
    } else {
        None
    };
    let payload = r.get_rest();
    Ok(Publish {
        dup: flags.contains(PublishFlags::DUP),
        qos,
        retain: flags.contains(PublishFlags::RETAIN),
        topic,
        packet_id,
        payload,
    })
}

fn parse_packet_id_only(body: &[u8]) -> Result<PacketId, DecodeError> {
    let mut r = Reader::new(body);
    r.get_u16()
}

fn parse_subscribe<'a>(body: &'a [u8]) -> Result<Subscribe<'a>, DecodeError> {
    let mut r = Reader::new(body);
    let packet_id = r.get_u16()?;
    let mut subscriptions = Vec::new();
    while r.remaining() > 0 {
        let filter = r.get_str()?;
        let qos_byte = r.get_u8()?;
        let qos =
            QoS::try_from(qos_byte).map_err(|_| DecodeError::ProtocolViolation("invalid requested QoS"))?;
        subscriptions.push((filter, qos));
    }
    if subscriptions.is_empty() {
        return Err(DecodeError::ProtocolViolation("subscribe with no topic filters"));
    }
    Ok(Subscribe {
        packet_id,
        subscriptions,
    })
}

fn parse_subscribe_ack(body: &[u8]) -> Result<SubscribeAck, DecodeError> {
    let mut r = Reader::new(body);
    let packet_id = r.get_u16()?;
    let mut status = Vec::new();
    while r.remaining() > 0 {
        let b = r.get_u8()?;
        status.push(if b & SubscribeReturnCode::FAILURE != 0 {
            SubscribeReturnCode::Failure
        } else {
            let qos = QoS::try_from(b & 0x03)
                .map_err(|_| DecodeError::ProtocolViolation("invalid granted QoS"))?;
            SubscribeReturnCode::Success(qos)
        });
    }
    Ok(SubscribeAck { packet_id, status })
}

fn parse_unsubscribe<'a>(body: &'a [u8]) -> Result<Unsubscribe<'a>, DecodeError> {
    let mut r = Reader::new(body);
    let packet_id = r.get_u16()?;
    let mut topic_filters = Vec::new();
    while r.remaining() > 0 {
        topic_filters.push(r.get_str()?);
    }
    if topic_filters.is_empty() {
        return Err(DecodeError::ProtocolViolation("unsubscribe with no topic filters"));
    }
    Ok(Unsubscribe {
        packet_id,
        topic_filters,
    })
}

fn check_reserved_flags(ty: Type, flags: u8) -> Result<(), DecodeError> {
    let expected = match ty {
        Type::PUBREL | Type::SUBSCRIBE | Type::UNSUBSCRIBE => 0x02,
        Type::PUBLISH => return Ok(()),
        _ => 0x00,
    };
    if flags == expected {
        Ok(())
    } else {
        Err(DecodeError::reserved_flags(ty))
    }
}

fn parse_body<'a>(ty: Type, flags: u8, body: &'a [u8]) -> Result<Packet<'a>, DecodeError> {
    check_reserved_flags(ty, flags)?;
    Ok(match ty {
        Type::CONNECT => Packet::Connect(parse_connect(body)?),
        Type::CONNACK => Packet::ConnectAck(parse_connect_ack(body)?),
        Type::PUBLISH => Packet::Publish(parse_publish(flags, body)?),
        Type::PUBACK => Packet::PublishAck(PublishAck {
            packet_id: parse_packet_id_only(body)?,
        }),
        Type::PUBREC => Packet::PublishReceived(PublishReceived {
            packet_id: parse_packet_id_only(body)?,
        }),
        Type::PUBREL => Packet::PublishRelease(PublishRelease {
            packet_id: parse_packet_id_only(body)?,
        }),
        Type::PUBCOMP => Packet::PublishComplete(PublishComplete {
            packet_id: parse_packet_id_only(body)?,
        }),
        Type::SUBSCRIBE => Packet::Subscribe(parse_subscribe(body)?),
        Type::SUBACK => Packet::SubscribeAck(parse_subscribe_ack(body)?),
        Type::UNSUBSCRIBE => Packet::Unsubscribe(parse_unsubscribe(body)?),
        Type::UNSUBACK => Packet::UnsubscribeAck(UnsubscribeAck {
            packet_id: parse_packet_id_only(body)?,
        }),
        Type::PINGREQ => Packet::Ping,
        Type::PINGRESP => Packet::Pong,
        Type::DISCONNECT => Packet::Disconnect,
    })
}

/// Parses a single packet from the front of `input`, given the configured
/// max frame size. `Ok(None)` means the buffer does not yet hold a complete
/// frame (`DecodeError::NeedMore` collapsed to `None` since it isn't fatal).
fn parse_one<'a>(input: &'a [u8], max_frame_size: usize) -> Result<Option<(Packet<'a>, usize)>, DecodeError> {
    if input.is_empty() {
        return Ok(None);
    }
    let first = input[0];
    let raw_type = (first >> 4) & 0x0F;
    let flags = first & 0x0F;

    let (remaining_length, varint_len) = match decode_remaining_length(&input[1..]) {
        Ok(v) => v,
        Err(DecodeError::NeedMore) => return Ok(None),
        Err(e) => return Err(e),
    };
    if remaining_length > max_frame_size {
        return Err(DecodeError::TooLarge(remaining_length, max_frame_size));
    }

    let header_len = 1 + varint_len;
    let total_len = header_len + remaining_length;
    if input.len() < total_len {
        return Ok(None);
    }

    let ty = Type::try_from(raw_type).map_err(|_| DecodeError::unexpected_type(first))?;
    let header = FixedHeader {
        packet_type: ty,
        packet_flags: flags,
        remaining_length,
    };
    let body = &input[header_len..total_len];
    let packet = parse_body(header.packet_type, header.packet_flags, body)?;
    Ok(Some((packet, total_len)))
}

const DEFAULT_INITIAL_CAPACITY: usize = 8 * 1024;

/// Single-owner, stateful MQTT decoder. Fed raw bytes as they arrive from the
/// transport; emits fully-parsed, owned packets and retains any trailing
/// partial frame for the next call.
pub struct Decoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_REMAINING_LENGTH)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Decoder {
            buffer: BytesMut::with_capacity(DEFAULT_INITIAL_CAPACITY),
            max_frame_size,
        }
    }

    /// Appends `bytes` to the internal buffer and parses as many complete
    /// frames as are available, in order. On `Err`, the connection is no
    /// longer usable: the malformed bytes are never retried.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<OwnedPacket>, DecodeError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            match parse_one(&self.buffer, self.max_frame_size) {
                Ok(Some((packet, consumed))) => {
                    out.push(OwnedPacket::from(packet));
                    self.buffer.advance(consumed);
                }
                Ok(None) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_to_vec;

    fn sample_packets() -> Vec<Packet<'static>> {
        vec![
            Packet::Ping,
            Packet::Pong,
            Packet::Disconnect,
            Packet::ConnectAck(ConnectAck {
                session_present: true,
                return_code: ConnectReturnCode::ConnectionAccepted,
            }),
            Packet::Publish(Publish {
                dup: false,
                qos: QoS::AtMostOnce,
                retain: false,
                topic: "a/b",
                packet_id: None,
                payload: b"hello",
            }),
            Packet::PublishAck(PublishAck { packet_id: 7 }),
        ]
    }

    #[test]
    fn decodes_one_shot_feed() {
        let packets = sample_packets();
        let mut bytes = Vec::new();
        for p in &packets {
            bytes.extend(encode_to_vec(p));
        }

        let mut decoder = Decoder::new();
        let decoded = decoder.feed(&bytes).unwrap();
        assert_eq!(decoded.len(), packets.len());
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn decodes_byte_by_byte() {
        let packets = sample_packets();
        let mut bytes = Vec::new();
        for p in &packets {
            bytes.extend(encode_to_vec(p));
        }

        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        for byte in bytes {
            decoded.extend(decoder.feed(&[byte]).unwrap());
        }
        assert_eq!(decoded.len(), packets.len());
    }

    #[test]
    fn rejects_bad_protocol_name() {
        let mut decoder = Decoder::new();
        // CONNECT with remaining-length 2, garbage protocol name bytes.
        let bytes = [0x10, 0x02, 0x00, 0x00];
        assert!(matches!(decoder.feed(&bytes), Err(DecodeError::ProtocolViolation(_))));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut decoder = Decoder::with_max_frame_size(4);
        let bytes = [0x30, 0x05, 0, 1, b'x', 1];
        assert!(matches!(decoder.feed(&bytes), Err(DecodeError::TooLarge(5, 4))));
    }

    #[test]
    fn rejects_subscribe_without_filters() {
        let mut decoder = Decoder::new();
        let bytes = [0x82, 0x02, 0x00, 0x01];
        assert!(matches!(decoder.feed(&bytes), Err(DecodeError::ProtocolViolation(_))));
    }

    #[test]
    fn rejects_publish_qos_three() {
        let mut decoder = Decoder::new();
        // PUBLISH fixed-header flags 0b0110 => qos bits 11 (3), invalid.
        let bytes = [0x36, 0x04, 0x00, 0x01, b'x', 0xAA];
        assert!(matches!(decoder.feed(&bytes), Err(DecodeError::ProtocolViolation(_))));
    }
}
