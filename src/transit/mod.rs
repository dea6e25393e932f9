//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The layer that turns broker operations into packets and back.
//!
//! The transit owns the transport subscriptions, the packet codec
//! (delegated to the serializer), and the pending-response table. Its
//! receive loop dispatches inbound packets: requests and events into the
//! broker, responses into pending slots, discovery and liveness packets
//! into the registry.
//!
//! Packets whose sender is the local node are discarded, since broadcast
//! subjects echo a node's own traffic back on shared substrates.

mod pending;

pub use pending::{PendingRequests, PendingResult};

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::context::Context;
use crate::error::BrokerError;
use crate::packet::{
    unix_millis, DisconnectPayload, DiscoverPayload, EventPayload, HeartbeatPayload, InfoPayload,
    Packet, PingPayload, PongPayload, RequestPayload, ResponsePayload, Topic, PROTOCOL_VERSION,
};
use crate::serialization::Serializer;
use crate::transport::{TransportMessage, Transporter};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Packet pump between the broker and its transporter.
pub struct Transit {
    config: Arc<BrokerConfig>,
    transporter: Arc<dyn Transporter>,
    serializer: Arc<dyn Serializer>,
    pub(crate) pending: PendingRequests,
    pending_pings: Mutex<HashMap<String, oneshot::Sender<Duration>>>,
    connected: AtomicBool,
}

impl Transit {
    /// Creates a transit over the given transporter and serializer.
    #[must_use]
    pub fn new(
        config: Arc<BrokerConfig>,
        transporter: Arc<dyn Transporter>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            config,
            transporter,
            serializer,
            pending: PendingRequests::new(),
            pending_pings: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether the transit is connected to its substrate.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connects the transporter, makes all subscriptions, and spawns the
    /// receive loop.
    ///
    /// Returns the receive-loop handle so the broker can abort it on
    /// stop.
    ///
    /// # Errors
    ///
    /// Fails when the transporter cannot connect or a subscription is
    /// rejected.
    pub async fn connect(
        self: &Arc<Self>,
        broker: Broker,
    ) -> Result<JoinHandle<()>, BrokerError> {
        let (sink, mut inbound) = mpsc::unbounded_channel::<TransportMessage>();
        self.transporter.set_sink(sink);
        self.transporter.connect().await?;

        let node = self.config.node_id.clone();
        let subscriptions = [
            Topic::Request(node.clone()),
            Topic::Response(node.clone()),
            Topic::Event(node.clone()),
            Topic::Info,
            Topic::InfoTargeted(node.clone()),
            Topic::Heartbeat,
            Topic::Disconnect,
            Topic::Discover,
            Topic::DiscoverTargeted(node.clone()),
            Topic::Ping,
            Topic::PingTargeted(node.clone()),
            Topic::Pong(node.clone()),
        ];
        for topic in subscriptions {
            self.transporter
                .subscribe(topic.kind(), topic.render(&self.config.namespace))
                .await?;
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(node = %node, transporter = self.transporter.name(), "transit connected");

        let transit = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                if let Err(err) = transit.handle(&broker, message).await {
                    warn!(error = %err, "failed to process inbound packet");
                }
            }
            // The sink closed underneath us: the transporter is gone.
            // Callers parked on responses will never see them.
            let rejected = transit
                .pending
                .reject_all_transport_lost("inbound channel closed")
                .await;
            if rejected > 0 {
                warn!(rejected, "transport lost with requests in flight");
            }
        });
        Ok(handle)
    }

    /// Publishes a DISCONNECT, rejects all pending slots, and tears the
    /// transporter down.
    ///
    /// # Errors
    ///
    /// Fails when the transporter teardown fails; pending slots are
    /// rejected regardless.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        if self.is_connected() {
            let packet = Packet::Disconnect(DisconnectPayload {
                ver: PROTOCOL_VERSION.to_string(),
                sender: self.config.node_id.clone(),
            });
            if let Err(err) = self.publish(Topic::Disconnect, &packet).await {
                warn!(error = %err, "failed to publish DISCONNECT");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        let rejected = self.pending.reject_all_stopping().await;
        if rejected > 0 {
            debug!(rejected, "rejected pending requests on stop");
        }
        self.transporter.disconnect().await?;
        Ok(())
    }

    /// Broadcasts a DISCOVER so every peer republishes its INFO.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn discover(&self) -> Result<(), BrokerError> {
        let packet = Packet::Discover(DiscoverPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
        });
        self.publish(Topic::Discover, &packet).await
    }

    /// Sends a targeted DISCOVER to one (unknown) node.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn discover_node(&self, node_id: &str) -> Result<(), BrokerError> {
        let packet = Packet::Discover(DiscoverPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
        });
        self.publish(Topic::DiscoverTargeted(node_id.to_string()), &packet)
            .await
    }

    /// Publishes the local INFO snapshot, broadcast or targeted.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn publish_info(
        &self,
        payload: InfoPayload,
        target: Option<&str>,
    ) -> Result<(), BrokerError> {
        let topic = match target {
            Some(node) => Topic::InfoTargeted(node.to_string()),
            None => Topic::Info,
        };
        self.publish(topic, &Packet::Info(payload)).await
    }

    /// Broadcasts a HEARTBEAT.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn send_heartbeat(&self, cpu: Option<f64>) -> Result<(), BrokerError> {
        let packet = Packet::Heartbeat(HeartbeatPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
            cpu,
        });
        self.publish(Topic::Heartbeat, &packet).await
    }

    /// Serializes a REQUEST for the context's selected node, parks a
    /// pending slot, and publishes it.
    ///
    /// The returned receiver resolves with the RESPONSE outcome; the
    /// caller owns the timeout and must [`PendingRequests::cancel`] the
    /// slot when it elapses.
    ///
    /// # Errors
    ///
    /// Fails when no executor node is recorded on the context or the
    /// packet cannot be published (the slot is cleaned up on failure).
    pub async fn send_request(
        &self,
        ctx: &Context,
    ) -> Result<oneshot::Receiver<PendingResult>, BrokerError> {
        let node_id = ctx
            .node_id()
            .ok_or_else(|| BrokerError::ServiceNotAvailable {
                action: ctx.action().unwrap_or_default().to_string(),
                node_id: None,
            })?
            .to_string();
        let payload = RequestPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
            id: ctx.id().to_string(),
            action: ctx.action().unwrap_or_default().to_string(),
            params: ctx.params().clone(),
            meta: ctx.meta_snapshot(),
            timeout: ctx.timeout().as_millis() as u64,
            level: ctx.level(),
            metrics: ctx.metrics(),
            parent_id: ctx.parent_id().map(str::to_string),
            request_id: ctx.request_id().to_string(),
        };
        let receiver = self.pending.register(ctx.id(), &node_id).await;
        let result = self
            .publish(Topic::Request(node_id), &Packet::Request(payload))
            .await;
        if let Err(err) = result {
            self.pending.cancel(ctx.id()).await;
            return Err(err);
        }
        Ok(receiver)
    }

    /// Publishes the RESPONSE for an executed inbound request.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn send_response(
        &self,
        target: &str,
        id: &str,
        result: Result<Value, BrokerError>,
    ) -> Result<(), BrokerError> {
        let payload = match result {
            Ok(data) => ResponsePayload {
                ver: PROTOCOL_VERSION.to_string(),
                sender: self.config.node_id.clone(),
                id: id.to_string(),
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => ResponsePayload {
                ver: PROTOCOL_VERSION.to_string(),
                sender: self.config.node_id.clone(),
                id: id.to_string(),
                success: false,
                data: None,
                error: Some(err.to_envelope(&self.config.node_id)),
            },
        };
        self.publish(
            Topic::Response(target.to_string()),
            &Packet::Response(payload),
        )
        .await
    }

    /// Publishes one EVENT delivery to one target node.
    ///
    /// # Errors
    ///
    /// Fails when the packet cannot be published.
    pub async fn send_event(
        &self,
        target: &str,
        event: &str,
        data: Value,
        groups: Option<Vec<String>>,
        broadcast: bool,
    ) -> Result<(), BrokerError> {
        let payload = EventPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
            event: event.to_string(),
            data,
            groups,
            broadcast,
        };
        self.publish(Topic::Event(target.to_string()), &Packet::Event(payload))
            .await
    }

    /// Measures the round-trip time to a peer via PING/PONG.
    ///
    /// # Errors
    ///
    /// [`BrokerError::RequestTimeout`] when no PONG arrives within
    /// `timeout`.
    pub async fn ping(&self, node_id: &str, timeout: Duration) -> Result<Duration, BrokerError> {
        let (sender, receiver) = oneshot::channel();
        self.pending_pings
            .lock()
            .await
            .insert(node_id.to_string(), sender);
        let packet = Packet::Ping(PingPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
            time: unix_millis(),
        });
        self.publish(Topic::PingTargeted(node_id.to_string()), &packet)
            .await?;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(rtt)) => Ok(rtt),
            _ => {
                self.pending_pings.lock().await.remove(node_id);
                Err(BrokerError::RequestTimeout {
                    action: "ping".to_string(),
                    node_id: Some(node_id.to_string()),
                    elapsed: timeout,
                })
            }
        }
    }

    /// Number of requests currently awaiting responses.
    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    async fn publish(&self, topic: Topic, packet: &Packet) -> Result<(), BrokerError> {
        let bytes = self.serializer.serialize(packet)?;
        self.transporter
            .publish(topic.render(&self.config.namespace), bytes)
            .await?;
        Ok(())
    }

    /// Dispatches one inbound message.
    async fn handle(
        self: &Arc<Self>,
        broker: &Broker,
        message: TransportMessage,
    ) -> Result<(), BrokerError> {
        let packet = self
            .serializer
            .deserialize(&message.payload, message.kind)?;
        if packet.sender() == self.config.node_id {
            return Ok(());
        }
        match packet {
            Packet::Request(payload) => {
                let broker = broker.clone();
                let transit = Arc::clone(self);
                tokio::spawn(async move {
                    let sender = payload.sender.clone();
                    let id = payload.id.clone();
                    let result = broker.invoke_incoming_request(payload).await;
                    if let Err(err) = transit.send_response(&sender, &id, result).await {
                        warn!(error = %err, node = %sender, "failed to send response");
                    }
                });
            }
            Packet::Response(payload) => {
                let outcome = if payload.success {
                    Ok(payload.data.unwrap_or(Value::Null))
                } else {
                    Err(payload
                        .error
                        .map(crate::error::ErrorEnvelope::into_error)
                        .unwrap_or_else(|| {
                            BrokerError::custom("UnknownError", "response carried no error")
                        }))
                };
                if !self.pending.complete(&payload.id, outcome).await {
                    debug!(id = %payload.id, "response for unknown request (timed out?)");
                }
            }
            Packet::Event(payload) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    broker.dispatch_incoming_event(payload).await;
                });
            }
            Packet::Info(payload) => broker.handle_info(payload).await,
            Packet::Heartbeat(payload) => {
                if !broker.registry().heartbeat(&payload) {
                    // Unknown peer: ask it to introduce itself.
                    self.discover_node(&payload.sender).await?;
                }
            }
            Packet::Disconnect(payload) => {
                broker.handle_node_disconnected(&payload.sender, false).await;
            }
            Packet::Discover(payload) => {
                broker.publish_local_info(Some(&payload.sender)).await?;
            }
            Packet::Ping(payload) => {
                let pong = Packet::Pong(PongPayload {
                    ver: PROTOCOL_VERSION.to_string(),
                    sender: self.config.node_id.clone(),
                    time: payload.time,
                    arrived: unix_millis(),
                });
                self.publish(Topic::Pong(payload.sender), &pong).await?;
            }
            Packet::Pong(payload) => {
                let rtt = Duration::from_millis(unix_millis().saturating_sub(payload.time));
                if let Some(sender) = self.pending_pings.lock().await.remove(&payload.sender) {
                    let _ = sender.send(rtt);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transit")
            .field("node_id", &self.config.node_id)
            .field("transporter", &self.transporter.name())
            .field("serializer", &self.serializer.name())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// Made with Bob
