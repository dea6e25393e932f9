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

//! Transport substrate behind the broker.
//!
//! A [`Transporter`] moves opaque payload bytes between brokers on named
//! subjects. The broker core never touches sockets; concrete bindings
//! (message queues, pub/sub systems, or the in-process [`MemoryHub`])
//! implement this trait.
//!
//! Inbound messages flow through a sink channel installed by the transit
//! before `connect`; each delivered [`TransportMessage`] carries the
//! packet kind implied by the subscribed topic.

mod error;
mod memory;

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransporter};

use crate::packet::PacketKind;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// An inbound message delivered by a transporter.
#[derive(Debug)]
pub struct TransportMessage {
    /// Packet kind implied by the topic the message arrived on.
    pub kind: PacketKind,
    /// Encoded packet payload.
    pub payload: Vec<u8>,
}

/// Bidirectional framed messaging over a chosen substrate.
///
/// The contract is deliberately narrow:
///
/// - `subscribe` registers interest in a rendered subject string; every
///   message later published there is pushed into the installed sink,
///   tagged with the subscription's packet kind.
/// - `publish` sends bytes to a subject; delivery is at-most-once with no
///   acknowledgement at this layer.
/// - Messages published by a node on a subject it also subscribes to may
///   be delivered back to it; the transit discards packets whose sender is
///   the local node.
///
/// Implementations must be clonable via `Arc` and safe for concurrent
/// use. Ordering guarantees are whatever the substrate provides; the
/// broker does not require FIFO.
#[async_trait]
pub trait Transporter: Send + Sync + 'static {
    /// Installs the channel inbound messages are pushed into.
    ///
    /// Must be called before [`connect`](Self::connect); messages arriving
    /// without a sink are dropped.
    fn set_sink(&self, sink: mpsc::UnboundedSender<TransportMessage>);

    /// Establishes the connection to the substrate.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the substrate is unreachable.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tears the connection down and drops all subscriptions.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the teardown fails; the
    /// transporter must still be considered disconnected afterward.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Subscribes to a subject; inbound messages are tagged with `kind`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when not connected or the substrate
    /// rejects the subscription.
    async fn subscribe(&self, kind: PacketKind, topic: String) -> Result<(), TransportError>;

    /// Publishes payload bytes on a subject.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when not connected or the send fails.
    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Returns the transporter name for logging.
    fn name(&self) -> &'static str;
}
