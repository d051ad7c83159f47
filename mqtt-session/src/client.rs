//! Public client façade: `connect`/`publish`/`subscribe`/`unsubscribe`/
//! `receive`/`disconnect`, matching the teacher's `Client<T, P>` shape but
//! backed by the async session worker instead of a blocking stream.

use bytes::Bytes;
use mqtt_wire::{QoS, SubscribeReturnCode};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::inflight::PublishOutcome;
use crate::options::ConnectOptions;
use crate::session::{self, Connector, InboundMessage, SessionHandle};
use crate::transport::{connect_tcp, Transport};

pub use crate::inflight::PublishOutcome as PublishResult;
pub use crate::session::InboundMessage as Message;

/// Connects over plain TCP, matching the teacher's `connect::connect` free
/// function minus its MQTT5 property negotiation.
pub async fn connect(addr: impl Into<String>, options: ConnectOptions) -> Result<Client> {
    let addr = addr.into();
    let connector: Connector = Box::new(move || {
        let addr = addr.clone();
        Box::pin(async move { connect_tcp(addr).await.map(|s| Box::new(s) as Box<dyn Transport>) })
    });
    connect_with(connector, options).await
}

/// Connects with a caller-supplied transport factory, e.g. the in-memory
/// loopback used in tests or a TLS-wrapping stream.
pub async fn connect_with(connector: Connector, options: ConnectOptions) -> Result<Client> {
    let (handle, inbound) = session::connect(options, connector).await?;
    Ok(Client { handle, inbound })
}

/// A connected MQTT session.
pub struct Client {
    handle: SessionHandle,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl Client {
    /// Publishes `payload` to `topic`. Resolves once delivery completes
    /// (QoS 0: immediately after the write; QoS 1/2: after the handshake
    /// finishes, times out, or the session disconnects).
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishResult> {
        self.handle.publish(topic, payload, qos, retain).await
    }

    pub async fn subscribe(&self, filters: Vec<(String, QoS)>) -> Result<Vec<SubscribeReturnCode>> {
        self.handle.subscribe(filters).await
    }

    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<()> {
        self.handle.unsubscribe(filters).await
    }

    /// Pulls the next inbound message, or `None` once the session has
    /// terminated and no further messages will arrive.
    pub async fn receive(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }

    pub async fn disconnect(self) {
        self.handle.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback;
    use mqtt_wire::{ConnectAck, ConnectReturnCode, Decoder, Packet};

    /// Drives a minimal broker stand-in over one half of a loopback pair:
    /// accepts the Connect, replies ConnectAck(accepted), then echoes every
    /// inbound Publish back out at QoS 0.
    async fn spawn_stub_broker(mut broker: impl Transport + 'static) {
        tokio::spawn(async move {
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match broker.read_some(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let packets = match decoder.feed(&buf[..n]) {
                    Ok(p) => p,
                    Err(_) => break,
                };
                for packet in packets {
                    match packet {
                        mqtt_wire::OwnedPacket::Connect(_) => {
                            let ack = Packet::ConnectAck(ConnectAck {
                                session_present: false,
                                return_code: ConnectReturnCode::ConnectionAccepted,
                            });
                            let bytes = mqtt_wire::encode_to_vec(&ack);
                            if broker.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        mqtt_wire::OwnedPacket::Disconnect => return,
                        _ => {}
                    }
                }
            }
        });
    }

    #[tokio::test]
    async fn connect_handshake_succeeds_against_loopback() {
        let (client_io, broker_io) = loopback(16 * 1024);
        spawn_stub_broker(broker_io).await;

        let connector: Connector = {
            let client_io = std::sync::Arc::new(tokio::sync::Mutex::new(Some(client_io)));
            Box::new(move || {
                let client_io = client_io.clone();
                Box::pin(async move {
                    let stream = client_io.lock().await.take().expect("loopback connects once in this test");
                    Ok(Box::new(stream) as Box<dyn Transport>)
                })
            })
        };

        let client = connect_with(connector, ConnectOptions::new("test-client")).await;
        assert!(client.is_ok());
    }
}
