//! MQTT 3.1.1 Control Packet types.
//!
//! `Packet<'a>` borrows its string and binary fields from the buffer it was
//! decoded from (or that the caller owns when encoding); `OwnedPacket` is the
//! allocation-owning counterpart used once a packet needs to outlive the read
//! buffer, e.g. crossing the channel into the session worker.

use std::convert::TryFrom;

use bytes::Bytes;
use num_enum::TryFromPrimitive;

/// MQTT Control Packets, borrowing from the buffer that produced them.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet<'a> {
    Connect(Connect<'a>),
    ConnectAck(ConnectAck),
    Publish(Publish<'a>),
    PublishAck(PublishAck),
    PublishReceived(PublishReceived),
    PublishRelease(PublishRelease),
    PublishComplete(PublishComplete),
    Subscribe(Subscribe<'a>),
    SubscribeAck(SubscribeAck),
    Unsubscribe(Unsubscribe<'a>),
    UnsubscribeAck(UnsubscribeAck),
    Ping,
    Pong,
    Disconnect,
}

/// Allocation-owning counterpart of [`Packet`].
///
/// Produced by the decoder immediately after a zero-copy parse so the value
/// can cross an `mpsc` channel into the session worker without borrowing the
/// read buffer.
#[derive(Debug, PartialEq, Clone)]
pub enum OwnedPacket {
    Connect(OwnedConnect),
    ConnectAck(ConnectAck),
    Publish(OwnedPublish),
    PublishAck(PublishAck),
    PublishReceived(PublishReceived),
    PublishRelease(PublishRelease),
    PublishComplete(PublishComplete),
    Subscribe(OwnedSubscribe),
    SubscribeAck(SubscribeAck),
    Unsubscribe(OwnedUnsubscribe),
    UnsubscribeAck(UnsubscribeAck),
    Ping,
    Pong,
    Disconnect,
}

impl From<Packet<'_>> for OwnedPacket {
    fn from(packet: Packet<'_>) -> Self {
        match packet {
            Packet::Connect(c) => OwnedPacket::Connect(c.to_owned()),
            Packet::ConnectAck(c) => OwnedPacket::ConnectAck(c),
            Packet::Publish(p) => OwnedPacket::Publish(p.to_owned()),
            Packet::PublishAck(p) => OwnedPacket::PublishAck(p),
            Packet::PublishReceived(p) => OwnedPacket::PublishReceived(p),
            Packet::PublishRelease(p) => OwnedPacket::PublishRelease(p),
            Packet::PublishComplete(p) => OwnedPacket::PublishComplete(p),
            Packet::Subscribe(s) => OwnedPacket::Subscribe(s.to_owned()),
            Packet::SubscribeAck(s) => OwnedPacket::SubscribeAck(s),
            Packet::Unsubscribe(u) => OwnedPacket::Unsubscribe(u.to_owned()),
            Packet::UnsubscribeAck(u) => OwnedPacket::UnsubscribeAck(u),
            Packet::Ping => OwnedPacket::Ping,
            Packet::Pong => OwnedPacket::Pong,
            Packet::Disconnect => OwnedPacket::Disconnect,
        }
    }
}

/// Fixed header common to every MQTT Control Packet.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct FixedHeader {
    pub packet_type: Type,
    pub packet_flags: u8,
    pub remaining_length: usize,
}

/// MQTT Control Packet type, the high nibble of the fixed header byte.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    CONNECT = 1,
    CONNACK = 2,
    PUBLISH = 3,
    PUBACK = 4,
    PUBREC = 5,
    PUBREL = 6,
    PUBCOMP = 7,
    SUBSCRIBE = 8,
    SUBACK = 9,
    UNSUBSCRIBE = 10,
    UNSUBACK = 11,
    PINGREQ = 12,
    PINGRESP = 13,
    DISCONNECT = 14,
}

pub const PROTOCOL_NAME: &[u8] = b"\x00\x04MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

/// Quality of Service levels.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
pub enum QoS {
    /// At most once: no ack, no retry, delivered 0 or 1 times.
    AtMostOnce = 0,
    /// At least once: acked by PUBACK, may be delivered more than once.
    AtLeastOnce = 1,
    /// Exactly once: a four-packet handshake (PUBLISH/PUBREC/PUBREL/PUBCOMP).
    ExactlyOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::AtMostOnce
    }
}

bitflags::bitflags! {
    /// Connect Flags byte.
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        const USERNAME      = 0b1000_0000;
        const PASSWORD      = 0b0100_0000;
        const WILL_RETAIN   = 0b0010_0000;
        const WILL_QOS      = 0b0001_1000;
        const LAST_WILL     = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
    }
}

const WILL_QOS_SHIFT: usize = 3;

impl ConnectFlags {
    pub fn qos(self) -> Option<QoS> {
        QoS::try_from((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT).ok()
    }
}

impl From<QoS> for ConnectFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }
}

/// Client request to connect to a Server.
#[derive(Debug, PartialEq, Clone)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub last_will: Option<LastWill<'a>>,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl Connect<'_> {
    pub fn to_owned(&self) -> OwnedConnect {
        OwnedConnect {
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id.to_owned(),
            last_will: self.last_will.as_ref().map(LastWill::to_owned),
            username: self.username.map(str::to_owned),
            password: self.password.map(Bytes::copy_from_slice),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OwnedConnect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub last_will: Option<OwnedLastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

/// Last Will and Testament, published by the broker if the client disconnects ungracefully.
#[derive(Debug, PartialEq, Hash, Clone)]
pub struct LastWill<'a> {
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    pub message: &'a [u8],
}

impl LastWill<'_> {
    pub fn to_owned(&self) -> OwnedLastWill {
        OwnedLastWill {
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.to_owned(),
            message: Bytes::copy_from_slice(self.message),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OwnedLastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub message: Bytes,
}

/// Connect acknowledgment.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct ConnectAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct ConnectAckFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

/// The reason code carried by a ConnAck, verbatim from MQTT 3.1.1 §3.2.2.3.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum ConnectReturnCode {
    ConnectionAccepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServiceUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn ok(self) -> Result<(), Self> {
        if self == ConnectReturnCode::ConnectionAccepted {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ConnectReturnCode::ConnectionAccepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => {
                "connection refused, unacceptable protocol version"
            }
            ConnectReturnCode::IdentifierRejected => "connection refused, identifier rejected",
            ConnectReturnCode::ServiceUnavailable => "connection refused, server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => {
                "connection refused, bad user name or password"
            }
            ConnectReturnCode::NotAuthorized => "connection refused, not authorized",
        };
        f.write_str(msg)
    }
}

/// Packet Identifier: a 16-bit nonzero correlator for QoS≥1 exchanges.
pub type PacketId = u16;

/// Publish message.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish<'a> {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: &'a str,
    pub packet_id: Option<PacketId>,
    pub payload: &'a [u8],
}

impl Publish<'_> {
    pub fn flags(&self) -> PublishFlags {
        let mut flags = PublishFlags::from(self.qos);
        if self.dup {
            flags |= PublishFlags::DUP;
        }
        if self.retain {
            flags |= PublishFlags::RETAIN;
        }
        flags
    }

    pub fn to_owned(&self) -> OwnedPublish {
        OwnedPublish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.to_owned(),
            packet_id: self.packet_id,
            payload: Bytes::copy_from_slice(self.payload),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OwnedPublish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<PacketId>,
    pub payload: Bytes,
}

impl OwnedPublish {
    pub fn as_borrowed(&self) -> Publish<'_> {
        Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
            topic: &self.topic,
            packet_id: self.packet_id,
            payload: &self.payload,
        }
    }
}

bitflags::bitflags! {
    /// Fixed-header low nibble for a PUBLISH packet: dup(1) qos(2) retain(1).
    #[derive(Default)]
    pub struct PublishFlags: u8 {
        const DUP = 0b0000_1000;
        const QOS = 0b0000_0110;
        const RETAIN = 0b0000_0001;
    }
}

const PUBLISH_QOS_SHIFT: usize = 1;

impl PublishFlags {
    pub fn qos(self) -> Option<QoS> {
        QoS::try_from((self & Self::QOS).bits() >> PUBLISH_QOS_SHIFT).ok()
    }
}

impl From<QoS> for PublishFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << PUBLISH_QOS_SHIFT)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishAck {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishReceived {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishRelease {
    pub packet_id: PacketId,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishComplete {
    pub packet_id: PacketId,
}

/// Client subscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe<'a> {
    pub packet_id: PacketId,
    pub subscriptions: Vec<(&'a str, QoS)>,
}

impl Subscribe<'_> {
    pub fn to_owned(&self) -> OwnedSubscribe {
        OwnedSubscribe {
            packet_id: self.packet_id,
            subscriptions: self
                .subscriptions
                .iter()
                .map(|(filter, qos)| ((*filter).to_owned(), *qos))
                .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OwnedSubscribe {
    pub packet_id: PacketId,
    pub subscriptions: Vec<(String, QoS)>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    pub packet_id: PacketId,
    pub status: Vec<SubscribeReturnCode>,
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub const FAILURE: u8 = 0x80;
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> u8 {
        match code {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => SubscribeReturnCode::FAILURE,
        }
    }
}

/// Unsubscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe<'a> {
    pub packet_id: PacketId,
    pub topic_filters: Vec<&'a str>,
}

impl Unsubscribe<'_> {
    pub fn to_owned(&self) -> OwnedUnsubscribe {
        OwnedUnsubscribe {
            packet_id: self.packet_id,
            topic_filters: self.topic_filters.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct OwnedUnsubscribe {
    pub packet_id: PacketId,
    pub topic_filters: Vec<String>,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct UnsubscribeAck {
    pub packet_id: PacketId,
}
