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

//! In-process transport for testing and single-process clusters.
//!
//! A [`MemoryHub`] plays the role of the message substrate: every
//! [`MemoryTransporter`] attached to the same hub sees every subject
//! published on it. This makes a multi-broker cluster runnable inside one
//! test binary with no network stack.

use crate::packet::PacketKind;
use crate::transport::{TransportError, TransportMessage, Transporter};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

struct Subscription {
    owner: u64,
    topic: String,
    kind: PacketKind,
    sink: mpsc::UnboundedSender<TransportMessage>,
}

/// Shared in-process message substrate.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use swarmbus::transport::MemoryHub;
/// use swarmbus::{Broker, BrokerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = Arc::new(MemoryHub::new());
/// let a = Broker::builder(BrokerConfig::new("node-a"))
///     .transporter(hub.transporter())
///     .build();
/// let b = Broker::builder(BrokerConfig::new("node-b"))
///     .transporter(hub.transporter())
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryHub {
    subscriptions: Mutex<Vec<Subscription>>,
    next_transporter_id: AtomicU64,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transporter attached to this hub.
    #[must_use]
    pub fn transporter(self: &Arc<Self>) -> Arc<MemoryTransporter> {
        Arc::new(MemoryTransporter {
            hub: Arc::clone(self),
            id: self.next_transporter_id.fetch_add(1, Ordering::Relaxed),
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
        })
    }

    fn add_subscription(&self, subscription: Subscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    fn remove_owner(&self, owner: u64) {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|sub| sub.owner != owner);
    }

    /// Delivers a payload to every subscriber of `topic`.
    ///
    /// Subscribers whose sink has been dropped are pruned on the way.
    fn publish(&self, topic: &str, payload: &[u8]) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|sub| {
            if sub.topic != topic {
                return true;
            }
            sub.sink
                .send(TransportMessage {
                    kind: sub.kind,
                    payload: payload.to_vec(),
                })
                .is_ok()
        });
    }
}

/// Transporter bound to a [`MemoryHub`].
///
/// Obtained via [`MemoryHub::transporter`]. Publishing delivers
/// synchronously into every matching subscriber's sink; a node's own
/// subscriptions are included, and the transit layer is responsible for
/// discarding self-sent packets.
pub struct MemoryTransporter {
    hub: Arc<MemoryHub>,
    id: u64,
    sink: Mutex<Option<mpsc::UnboundedSender<TransportMessage>>>,
    connected: AtomicBool,
}

#[async_trait]
impl Transporter for MemoryTransporter {
    fn set_sink(&self, sink: mpsc::UnboundedSender<TransportMessage>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.remove_owner(self.id);
        Ok(())
    }

    async fn subscribe(&self, kind: PacketKind, topic: String) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let sink = self
            .sink
            .lock()
            .unwrap()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        trace!(topic = %topic, "memory transporter subscribing");
        self.hub.add_subscription(Subscription {
            owner: self.id,
            topic,
            kind,
            sink,
        });
        Ok(())
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.hub.publish(&topic, &payload);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = Arc::new(MemoryHub::new());
        let tx = hub.transporter();
        let rx = hub.transporter();

        let (sink, mut inbound) = mpsc::unbounded_channel();
        rx.set_sink(sink);
        rx.connect().await.unwrap();
        rx.subscribe(PacketKind::Event, "SB.EVENT".to_string())
            .await
            .unwrap();

        let (tx_sink, _keep) = mpsc::unbounded_channel();
        tx.set_sink(tx_sink);
        tx.connect().await.unwrap();
        tx.publish("SB.EVENT".to_string(), b"hello".to_vec())
            .await
            .unwrap();

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.kind, PacketKind::Event);
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let hub = Arc::new(MemoryHub::new());
        let rx = hub.transporter();
        let (sink, mut inbound) = mpsc::unbounded_channel();
        rx.set_sink(sink);
        rx.connect().await.unwrap();
        rx.subscribe(PacketKind::Request, "SB.REQ.node-1".to_string())
            .await
            .unwrap();

        let tx = hub.transporter();
        let (tx_sink, _keep) = mpsc::unbounded_channel();
        tx.set_sink(tx_sink);
        tx.connect().await.unwrap();
        tx.publish("SB.REQ.node-2".to_string(), b"other".to_vec())
            .await
            .unwrap();
        tx.publish("SB.REQ.node-1".to_string(), b"mine".to_vec())
            .await
            .unwrap();

        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.payload, b"mine");
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_removes_subscriptions() {
        let hub = Arc::new(MemoryHub::new());
        let rx = hub.transporter();
        let (sink, mut inbound) = mpsc::unbounded_channel();
        rx.set_sink(sink);
        rx.connect().await.unwrap();
        rx.subscribe(PacketKind::Info, "SB.INFO".to_string())
            .await
            .unwrap();
        rx.disconnect().await.unwrap();

        let tx = hub.transporter();
        let (tx_sink, _keep) = mpsc::unbounded_channel();
        tx.set_sink(tx_sink);
        tx.connect().await.unwrap();
        tx.publish("SB.INFO".to_string(), b"late".to_vec())
            .await
            .unwrap();
        assert!(inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_requires_connect() {
        let hub = Arc::new(MemoryHub::new());
        let t = hub.transporter();
        let err = t
            .publish("SB.INFO".to_string(), b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}

// Made with Bob
