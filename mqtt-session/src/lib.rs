//! An async MQTT 3.1.1 client session: packet-id allocation, QoS 1/2
//! inflight delivery with retry, QoS 2 inbound de-duplication, and a
//! reconnecting transport, all driven by a single worker task per session.
//!
//! Wire encoding/decoding lives in `mqtt_wire`, re-exported here for
//! convenience; this crate is the part that turns a byte stream into a
//! stateful client.

pub extern crate mqtt_wire;

mod client;
mod dedup;
mod error;
mod inflight;
mod options;
mod packet_id;
mod pool;
mod session;
mod subscription;
mod transport;

pub use client::{connect, connect_with, Client, Message, PublishResult};
pub use error::{ClientError, Result};
pub use inflight::PublishOutcome;
pub use options::{ConnectOptions, Credentials, ReconnectPolicy, Will};
pub use pool::{BufferPool, PooledBuffer};
pub use session::{Connector, InboundMessage, SessionHandle};
pub use subscription::topic_matches;
pub use transport::{connect_tcp, loopback, Transport};

pub use mqtt_wire::{QoS, SubscribeReturnCode};
