//! The session worker: a single-threaded, cooperative actor owning all
//! per-connection state.
//!
//! This generalizes the teacher's synchronous `Session<T, P>` — which blocks
//! the calling thread in `wait_for` until the matching ack arrives — into an
//! async task that owns a `mpsc` inbox and answers every caller through a
//! `oneshot` completion handle, the same request/response split `wait_for`
//! expresses synchronously. All mutation of the inflight map, dedup cache,
//! and subscription table happens here and only here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use mqtt_wire::{
    Connect, ConnectAck, ConnectFlags, ConnectReturnCode, Decoder, LastWill, OwnedPacket, Packet,
    PacketId, Publish, PublishAck, PublishComplete, PublishReceived, PublishRelease, QoS,
    Subscribe, SubscribeAck, SubscribeReturnCode, Unsubscribe, UnsubscribeAck,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::dedup::Dedup;
use crate::error::{ClientError, Result};
use crate::inflight::{Inflight, PublishOutcome, RetryAction};
use crate::options::ConnectOptions;
use crate::packet_id::PacketIdAllocator;
use crate::pool::BufferPool;
use crate::subscription::SubscriptionTable;
use crate::transport::Transport;

/// Every outbound frame round-trips through this pool instead of a fresh
/// `Vec` per send; see `write_bytes`.
const SEND_BUFFER_SIZE: usize = 512;
const SEND_BUFFER_POOL_CAPACITY: usize = 64;

/// Message delivered to the application for an inbound Publish.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces a fresh transport on (re)connect. Boxed so the session worker is
/// not generic over the concrete transport or socket-address type.
pub type Connector = Box<dyn Fn() -> BoxFuture<'static, std::io::Result<Box<dyn Transport>>> + Send + Sync>;

enum Command {
    Publish {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        reply: oneshot::Sender<Result<PublishOutcome>>,
    },
    Subscribe {
        filters: Vec<(String, QoS)>,
        reply: oneshot::Sender<Result<Vec<SubscribeReturnCode>>>,
    },
    Unsubscribe {
        filters: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// The caller-facing half of a session: a cheap handle to the worker's inbox.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

fn map_send_error<T>(err: TrySendError<T>) -> ClientError {
    match err {
        TrySendError::Full(_) => ClientError::BackpressureFull,
        TrySendError::Closed(_) => ClientError::Disconnected,
    }
}

impl SessionHandle {
    pub async fn publish(&self, topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Result<PublishOutcome> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .try_send(Command::Publish {
                topic: topic.into(),
                payload: payload.into(),
                qos,
                retain,
                reply,
            })
            .map_err(map_send_error)?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    pub async fn subscribe(&self, filters: Vec<(String, QoS)>) -> Result<Vec<SubscribeReturnCode>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .try_send(Command::Subscribe { filters, reply })
            .map_err(map_send_error)?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    pub async fn unsubscribe(&self, filters: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .try_send(Command::Unsubscribe { filters, reply })
            .map_err(map_send_error)?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Connected,
    Disconnected,
}

/// Tracks a command awaiting its SubAck/UnsubAck, plus the filters that were
/// requested, so the ack handler can update `SubscriptionTable` once the
/// broker's response arrives.
struct PendingAck<T> {
    filters: Vec<String>,
    reply: oneshot::Sender<T>,
}

struct Worker {
    connector: Connector,
    options: ConnectOptions,
    transport: Option<Box<dyn Transport>>,
    decoder: Decoder,
    state: State,

    packet_ids: PacketIdAllocator,
    inflight: Inflight,
    dedup: Dedup,
    subscriptions: SubscriptionTable,
    session_present: bool,

    pending_subscribe: HashMap<PacketId, PendingAck<Result<Vec<SubscribeReturnCode>>>>,
    pending_unsubscribe: HashMap<PacketId, PendingAck<Result<()>>>,

    last_send: Instant,
    last_recv: Instant,

    send_buffers: BufferPool,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<InboundMessage>,
    shutting_down: Option<oneshot::Sender<()>>,
}

/// Spawns the session worker and returns a handle to it plus the inbound
/// message stream. Blocks until the initial Connect handshake completes.
pub async fn connect(
    options: ConnectOptions,
    connector: Connector,
) -> Result<(SessionHandle, mpsc::Receiver<InboundMessage>)> {
    let (commands_tx, commands_rx) = mpsc::channel(options.outbound_queue_depth);
    let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_high_water_mark);

    let transport = (connector)().await?;
    let mut worker = Worker {
        connector,
        inflight: Inflight::new(options.max_retries, options.publish_timeout),
        dedup: Dedup::new(options.dedup_capacity, options.dedup_ttl),
        decoder: Decoder::with_max_frame_size(options.max_decode_frame_size),
        options,
        transport: Some(transport),
        state: State::Connecting,
        packet_ids: PacketIdAllocator::new(),
        subscriptions: SubscriptionTable::new(),
        session_present: false,
        pending_subscribe: HashMap::new(),
        pending_unsubscribe: HashMap::new(),
        last_send: Instant::now(),
        last_recv: Instant::now(),
        send_buffers: BufferPool::new(SEND_BUFFER_POOL_CAPACITY, SEND_BUFFER_SIZE),
        commands: commands_rx,
        inbound: inbound_tx,
        shutting_down: None,
    };

    worker.handshake().await?;

    tokio::spawn(worker.run());

    Ok((SessionHandle { commands: commands_tx }, inbound_rx))
}

impl Worker {
    async fn handshake(&mut self) -> Result<()> {
        let connect = Packet::Connect(Connect {
            clean_session: self.options.clean_session,
            keep_alive: self.options.keep_alive.as_secs() as u16,
            client_id: &self.options.client_id,
            last_will: self.options.will.as_ref().map(|w| LastWill {
                qos: w.qos,
                retain: w.retain,
                topic: &w.topic,
                message: &w.payload,
            }),
            username: self.options.credentials.as_ref().map(|c| c.username.as_str()),
            password: self
                .options
                .credentials
                .as_ref()
                .and_then(|c| c.password.as_deref()),
        });
        let bytes = mqtt_wire::encode_to_vec(&connect);
        self.write_bytes(&bytes).await?;

        loop {
            let packets = self.read_frame().await?;
            for packet in packets {
                if let OwnedPacket::ConnectAck(ConnectAck { session_present, return_code }) = packet {
                    return_code
                        .ok()
                        .map_err(ClientError::ConnectRefused)?;
                    self.session_present = session_present;
                    self.state = State::Connected;
                    self.last_recv = Instant::now();

                    if !self.options.clean_session && session_present {
                        // Broker remembers this session: it already has our
                        // subscriptions, so only replay inflight publishes,
                        // under their original ids with DUP=1.
                        self.inflight.arm_for_replay(Instant::now());
                    } else {
                        // Broker has no memory of a prior session (either we
                        // asked for a clean one, or it lost its state):
                        // resubscribe every filter and re-publish everything
                        // that was inflight under freshly allocated ids.
                        self.dedup.clear();
                        for (filter, qos) in self.subscriptions.filters().map(|(f, q)| (f.to_owned(), q)).collect::<Vec<_>>() {
                            let packet_id = self.packet_ids.next(|id| self.pending_subscribe.contains_key(&id)).unwrap_or(1);
                            let _ = self
                                .send(&Packet::Subscribe(Subscribe {
                                    packet_id,
                                    subscriptions: vec![(filter.as_str(), qos)],
                                }))
                                .await;
                        }
                        for (mut publish, completion) in self.inflight.drain() {
                            match self.packet_ids.next(|id| self.inflight.contains(id)) {
                                Some(packet_id) => {
                                    publish.dup = false;
                                    publish.packet_id = Some(packet_id);
                                    let _ = self.send(&Packet::Publish(publish.as_borrowed())).await;
                                    self.inflight.register(packet_id, publish, completion);
                                }
                                None => {
                                    let _ = completion.send(Err(ClientError::BackpressureFull));
                                }
                            }
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn run(mut self) {
        let mut keepalive = interval(
            self.options
                .keep_alive
                .max(Duration::from_millis(1))
                .div_f64(4.0)
                .max(Duration::from_millis(100)),
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry_ticker = interval(Duration::from_millis(250));

        let mut read_buf = vec![0u8; 8 * 1024];

        loop {
            let transport = match self.transport.as_mut() {
                Some(t) => t,
                None => break,
            };

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Err(err) = self.handle_command(cmd).await {
                                log::warn!("command failed: {}", err);
                            }
                            if matches!(self.state, State::Disconnected) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                result = transport.read_some(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            log::info!("transport closed by peer");
                            if !self.reconnect().await {
                                break;
                            }
                        }
                        Ok(n) => {
                            self.last_recv = Instant::now();
                            if let Err(err) = self.handle_bytes(&read_buf[..n]).await {
                                log::warn!("protocol error, tearing down: {}", err);
                                if !self.reconnect().await {
                                    break;
                                }
                            }
                        }
                        Err(err) => {
                            log::warn!("transport read failed: {}", err);
                            if !self.reconnect().await {
                                break;
                            }
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if let Err(err) = self.on_keepalive_tick().await {
                        log::warn!("keep-alive check failed: {}", err);
                        if !self.reconnect().await {
                            break;
                        }
                    }
                }
                _ = retry_ticker.tick() => {
                    self.flush_retries().await;
                }
            }
        }

        self.inflight.fail_all(|| PublishOutcome::Disconnected);
        if let Some(tx) = self.shutting_down.take() {
            let _ = tx.send(());
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Publish {
                topic,
                payload,
                qos,
                retain,
                reply,
            } => self.do_publish(topic, payload, qos, retain, reply).await,
            Command::Subscribe { filters, reply } => self.do_subscribe(filters, reply).await,
            Command::Unsubscribe { filters, reply } => self.do_unsubscribe(filters, reply).await,
            Command::Disconnect { reply } => {
                let _ = self.send(&Packet::Disconnect).await;
                if let Some(mut transport) = self.transport.take() {
                    let _ = transport.shutdown().await;
                }
                self.state = State::Disconnected;
                self.shutting_down = Some(reply);
                Ok(())
            }
        }
    }

    async fn do_publish(
        &mut self,
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        reply: oneshot::Sender<Result<PublishOutcome>>,
    ) -> Result<()> {
        if topic.len() > u16::MAX as usize {
            let _ = reply.send(Err(ClientError::InvalidArgument(
                "topic exceeds the 65535-byte wire length limit",
            )));
            return Ok(());
        }

        if qos == QoS::AtMostOnce {
            let packet = Packet::Publish(Publish {
                dup: false,
                qos,
                retain,
                topic: &topic,
                packet_id: None,
                payload: &payload,
            });
            self.send(&packet).await?;
            let _ = reply.send(Ok(PublishOutcome::Delivered));
            return Ok(());
        }

        if self.inflight.len() >= self.options.max_inflight {
            let _ = reply.send(Err(ClientError::BackpressureFull));
            return Ok(());
        }
        let packet_id = match self.packet_ids.next(|id| self.inflight.contains(id)) {
            Some(id) => id,
            None => {
                let _ = reply.send(Err(ClientError::BackpressureFull));
                return Ok(());
            }
        };
        let owned = mqtt_wire::OwnedPublish {
            dup: false,
            qos,
            retain,
            topic,
            packet_id: Some(packet_id),
            payload,
        };
        self.send(&Packet::Publish(owned.as_borrowed())).await?;
        self.inflight.register(packet_id, owned, reply);
        Ok(())
    }

    async fn do_subscribe(
        &mut self,
        filters: Vec<(String, QoS)>,
        reply: oneshot::Sender<Result<Vec<SubscribeReturnCode>>>,
    ) -> Result<()> {
        let packet_id = self.packet_ids.next(|id| self.pending_subscribe.contains_key(&id)).unwrap_or(1);
        let borrowed: Vec<(&str, QoS)> = filters.iter().map(|(f, q)| (f.as_str(), *q)).collect();
        self.send(&Packet::Subscribe(Subscribe {
            packet_id,
            subscriptions: borrowed,
        }))
        .await?;
        let requested = filters.into_iter().map(|(f, _)| f).collect();
        self.pending_subscribe.insert(packet_id, PendingAck { filters: requested, reply });
        Ok(())
    }

    async fn do_unsubscribe(&mut self, filters: Vec<String>, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        let packet_id = self.packet_ids.next(|id| self.pending_unsubscribe.contains_key(&id)).unwrap_or(1);
        let borrowed: Vec<&str> = filters.iter().map(String::as_str).collect();
        self.send(&Packet::Unsubscribe(Unsubscribe {
            packet_id,
            topic_filters: borrowed,
        }))
        .await?;
        self.pending_unsubscribe.insert(packet_id, PendingAck { filters, reply });
        Ok(())
    }

    async fn on_keepalive_tick(&mut self) -> Result<()> {
        let keep_alive = self.options.keep_alive;
        if keep_alive.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        if now.duration_since(self.last_recv) >= keep_alive.mul_f64(1.5) {
            return Err(ClientError::Disconnected);
        }
        if now.duration_since(self.last_send) >= keep_alive {
            self.send(&Packet::Ping).await?;
        }
        Ok(())
    }

    async fn flush_retries(&mut self) {
        let actions = self.inflight.poll_retries(Instant::now());
        for action in actions {
            let packet = match &action {
                RetryAction::ResendPublish(_, publish) => Packet::Publish(publish.as_borrowed()),
                RetryAction::ResendPubRel(id) => Packet::PublishRelease(PublishRelease { packet_id: *id }),
            };
            if let Err(err) = self.send(&packet).await {
                log::warn!("retry send failed: {}", err);
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<OwnedPacket>> {
        let mut buf = vec![0u8; 4096];
        let transport = self.transport.as_mut().ok_or(ClientError::Disconnected)?;
        let n = transport.read_some(&mut buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        self.decoder.feed(&buf[..n]).map_err(ClientError::from)
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let packets = self.decoder.feed(bytes)?;
        for packet in packets {
            self.handle_packet(packet).await?;
        }
        Ok(())
    }

    async fn handle_packet(&mut self, packet: OwnedPacket) -> Result<()> {
        match packet {
            OwnedPacket::Publish(publish) => self.handle_inbound_publish(publish).await?,
            OwnedPacket::PublishAck(PublishAck { packet_id }) => {
                self.inflight.on_pub_ack(packet_id);
            }
            OwnedPacket::PublishReceived(PublishReceived { packet_id }) => {
                if let Some(RetryAction::ResendPubRel(id)) = self.inflight.on_pub_rec(packet_id) {
                    self.send(&Packet::PublishRelease(PublishRelease { packet_id: id })).await?;
                }
            }
            OwnedPacket::PublishRelease(PublishRelease { packet_id }) => {
                self.dedup.complete(packet_id);
                self.send(&Packet::PublishComplete(PublishComplete { packet_id })).await?;
            }
            OwnedPacket::PublishComplete(PublishComplete { packet_id }) => {
                self.inflight.on_pub_comp(packet_id);
            }
            OwnedPacket::SubscribeAck(SubscribeAck { packet_id, status }) => {
                if let Some(pending) = self.pending_subscribe.remove(&packet_id) {
                    for (filter, code) in pending.filters.iter().zip(status.iter()) {
                        match code {
                            SubscribeReturnCode::Success(qos) => {
                                self.subscriptions.insert(filter.clone(), *qos);
                            }
                            SubscribeReturnCode::Failure => {
                                self.subscriptions.remove(filter);
                            }
                        }
                    }
                    let _ = pending.reply.send(Ok(status));
                }
            }
            OwnedPacket::UnsubscribeAck(UnsubscribeAck { packet_id }) => {
                if let Some(pending) = self.pending_unsubscribe.remove(&packet_id) {
                    for filter in &pending.filters {
                        self.subscriptions.remove(filter);
                    }
                    let _ = pending.reply.send(Ok(()));
                }
            }
            OwnedPacket::Pong => {}
            OwnedPacket::Disconnect => {
                self.state = State::Disconnected;
            }
            OwnedPacket::Connect(_)
            | OwnedPacket::ConnectAck(_)
            | OwnedPacket::Ping
            | OwnedPacket::Subscribe(_)
            | OwnedPacket::Unsubscribe(_) => {
                log::debug!("ignoring unexpected packet from broker");
            }
        }
        Ok(())
    }

    async fn handle_inbound_publish(&mut self, publish: mqtt_wire::OwnedPublish) -> Result<()> {
        match publish.qos {
            QoS::AtMostOnce => self.deliver(publish).await,
            QoS::AtLeastOnce => {
                let packet_id = publish.packet_id;
                self.deliver(publish).await;
                if let Some(packet_id) = packet_id {
                    self.send(&Packet::PublishAck(PublishAck { packet_id })).await?;
                }
                Ok(())
            }
            QoS::ExactlyOnce => {
                let packet_id = publish.packet_id.ok_or(ClientError::Protocol(
                    mqtt_wire::DecodeError::ProtocolViolation("qos2 publish without packet id"),
                ))?;
                let now = Instant::now();
                let already_seen = self.dedup.seen(packet_id, now);
                if !already_seen {
                    self.dedup.insert(packet_id, now);
                    self.deliver(publish).await;
                }
                self.send(&Packet::PublishReceived(PublishReceived { packet_id })).await
            }
        }
    }

    async fn deliver(&mut self, publish: mqtt_wire::OwnedPublish) -> Result<()> {
        let message = InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        };
        let _ = self.inbound.send(message).await;
        Ok(())
    }

    /// Encodes `packet` into a pooled buffer and writes it, rather than
    /// allocating a fresh `Vec` per frame.
    async fn send(&mut self, packet: &Packet<'_>) -> Result<()> {
        let mut buf = self.send_buffers.rent();
        let needed = mqtt_wire::estimate(packet).total_size;
        buf.resize(needed, 0);
        mqtt_wire::encode(packet, &mut buf[..needed]).map_err(|_| {
            ClientError::Protocol(mqtt_wire::DecodeError::ProtocolViolation("packet failed to encode"))
        })?;
        self.write_bytes(&buf[..needed]).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(ClientError::Disconnected)?;
        transport.write_all(bytes).await?;
        self.last_send = Instant::now();
        Ok(())
    }

    /// Attempts to re-establish the transport per the reconnect policy,
    /// preserving the inflight map and subscription table.
    async fn reconnect(&mut self) -> bool {
        self.transport = None;
        if !self.options.reconnect.enabled {
            self.state = State::Disconnected;
            return false;
        }
        self.state = State::Connecting;

        let mut attempt = 0u32;
        loop {
            if let Some(max) = self.options.reconnect.max_attempts {
                if attempt >= max {
                    self.state = State::Disconnected;
                    return false;
                }
            }
            let backoff = self.options.reconnect.backoff_for(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            match (self.connector)().await {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.decoder = Decoder::with_max_frame_size(self.options.max_decode_frame_size);
                    if self.handshake().await.is_ok() {
                        return true;
                    }
                    self.transport = None;
                }
                Err(err) => log::warn!("reconnect attempt {} failed: {}", attempt, err),
            }
            attempt += 1;
        }
    }
}
