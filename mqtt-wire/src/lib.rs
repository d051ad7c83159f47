//! MQTT 3.1.1 packet codec.
//!
//! This crate is a pure, allocation-conscious codec: it maps between
//! [`Packet`] values and bytes, with no knowledge of sessions, transports,
//! or QoS delivery semantics. Those live in `mqtt-session`, one layer up.

mod decode;
mod encode;
mod error;
mod packet;
mod size;
mod varint;

pub use decode::Decoder;
pub use encode::{encode, encode_to_vec};
pub use error::{DecodeError, EncodeError};
pub use packet::{
    Connect, ConnectAck, ConnectAckFlags, ConnectFlags, ConnectReturnCode, FixedHeader, LastWill,
    OwnedConnect, OwnedLastWill, OwnedPacket, OwnedPublish, OwnedSubscribe, OwnedUnsubscribe,
    Packet, PacketId, Publish, PublishAck, PublishComplete, PublishFlags, PublishReceived,
    PublishRelease, QoS, Subscribe, SubscribeAck, SubscribeReturnCode, Type, Unsubscribe,
    UnsubscribeAck, PROTOCOL_LEVEL, PROTOCOL_NAME,
};
pub use size::{estimate, SizeEstimate};
pub use varint::MAX_REMAINING_LENGTH;
