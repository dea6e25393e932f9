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

//! The transport-agnostic packet protocol.
//!
//! Every message between brokers is one of nine packet kinds, published on
//! a [`Topic`] that addresses either the whole cluster or a single node.
//! Payloads share a common envelope (`ver`, `sender`) and carry typed
//! fields per kind. The encoding is owned by the
//! [`Serializer`](crate::serialization::Serializer); this module defines
//! only the shapes.
//!
//! Request/response correlation is carried in the packet ids: a REQUEST's
//! `id` is echoed back in the matching RESPONSE, so no ordering guarantees
//! are required from the transport.

use crate::error::ErrorEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Version string stamped into every packet's `ver` field.
///
/// Receivers currently accept any version; the field exists so that a
/// future incompatible revision can be detected and rejected.
pub const PROTOCOL_VERSION: &str = "1";

/// Discriminates the nine packet kinds.
///
/// The kind is not encoded inside the payload; it is implied by the topic
/// a packet arrives on, which is why
/// [`Serializer::deserialize`](crate::serialization::Serializer::deserialize)
/// takes the kind alongside the bytes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketKind {
    /// Full node + service snapshot.
    Info,
    /// Periodic liveness beacon.
    Heartbeat,
    /// Request for a peer's INFO.
    Discover,
    /// Remote action invocation.
    Request,
    /// Result of a remote invocation.
    Response,
    /// Event delivery.
    Event,
    /// Graceful departure notice.
    Disconnect,
    /// Latency probe.
    Ping,
    /// Latency probe reply.
    Pong,
}

impl PacketKind {
    /// Returns the short uppercase token used in topic names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Heartbeat => "HEARTBEAT",
            Self::Discover => "DISCOVER",
            Self::Request => "REQ",
            Self::Response => "RES",
            Self::Event => "EVENT",
            Self::Disconnect => "DISCONNECT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A publish/subscribe subject.
///
/// Broadcast topics reach every broker; targeted topics carry a node id
/// suffix and reach one. [`Topic::render`] produces the concrete subject
/// string, including the shared prefix and the broker namespace, so that
/// clusters with different namespaces never see each other's traffic even
/// on a shared substrate.
///
/// # Examples
///
/// ```rust
/// use swarmbus::packet::Topic;
///
/// assert_eq!(Topic::Heartbeat.render(""), "SB.HEARTBEAT");
/// assert_eq!(
///     Topic::Request("node-1".to_string()).render("staging"),
///     "SB-staging.REQ.node-1"
/// );
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Topic {
    /// Requests addressed to one node: `REQ.<nodeId>`.
    Request(String),
    /// Responses addressed to one node: `RES.<nodeId>`.
    Response(String),
    /// Event deliveries addressed to one node: `EVENT.<nodeId>`.
    ///
    /// Event fan-out is computed on the emitting side (one packet per
    /// target node, carrying the groups that node must serve), so the
    /// wire delivery is always targeted.
    Event(String),
    /// INFO broadcast to the cluster.
    Info,
    /// INFO addressed to one node: `INFO.<nodeId>`.
    InfoTargeted(String),
    /// Heartbeat broadcast.
    Heartbeat,
    /// Graceful-disconnect broadcast.
    Disconnect,
    /// Discovery broadcast.
    Discover,
    /// Discovery addressed to one node: `DISCOVER.<nodeId>`.
    DiscoverTargeted(String),
    /// Ping broadcast.
    Ping,
    /// Ping addressed to one node: `PING.<nodeId>`.
    PingTargeted(String),
    /// Pong addressed to one node: `PONG.<nodeId>`.
    Pong(String),
}

impl Topic {
    /// Returns the packet kind carried on this topic.
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Request(_) => PacketKind::Request,
            Self::Response(_) => PacketKind::Response,
            Self::Event(_) => PacketKind::Event,
            Self::Info | Self::InfoTargeted(_) => PacketKind::Info,
            Self::Heartbeat => PacketKind::Heartbeat,
            Self::Disconnect => PacketKind::Disconnect,
            Self::Discover | Self::DiscoverTargeted(_) => PacketKind::Discover,
            Self::Ping | Self::PingTargeted(_) => PacketKind::Ping,
            Self::Pong(_) => PacketKind::Pong,
        }
    }

    /// Renders the concrete subject string for this topic.
    ///
    /// The namespace isolates clusters sharing a substrate; an empty
    /// namespace renders the bare `SB.` prefix.
    #[must_use]
    pub fn render(&self, namespace: &str) -> String {
        let prefix = if namespace.is_empty() {
            "SB".to_string()
        } else {
            format!("SB-{namespace}")
        };
        match self {
            Self::Request(node)
            | Self::Response(node)
            | Self::Event(node)
            | Self::InfoTargeted(node)
            | Self::DiscoverTargeted(node)
            | Self::PingTargeted(node)
            | Self::Pong(node) => format!("{prefix}.{}.{node}", self.kind()),
            _ => format!("{prefix}.{}", self.kind()),
        }
    }
}

/// Client/runtime description inside an INFO payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClientInfo {
    /// Implementation type, `"rust"` for this crate.
    #[serde(rename = "type")]
    pub client_type: String,
    /// Crate version of the sender.
    pub version: String,
    /// Language/runtime version string.
    #[serde(rename = "langVersion")]
    pub lang_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            client_type: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            lang_version: "stable".to_string(),
        }
    }
}

/// Wire form of an action descriptor inside an INFO payload.
///
/// Handlers never cross the wire; remote endpoints are invoked by name.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ActionInfo {
    /// Fully qualified action name (`math.add`, `v2.math.add`).
    pub name: String,
    /// Whether results of this action may be cached.
    #[serde(default)]
    pub cache: bool,
    /// Parameter schema, opaque to the broker core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Protected actions are hidden from listings.
    #[serde(default)]
    pub protected: bool,
}

/// Wire form of an event subscription inside an INFO payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EventInfo {
    /// Event name the service subscribes to.
    pub name: String,
    /// Consumer group; defaults to the service name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Wire form of a service descriptor inside an INFO payload.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ServiceInfo {
    /// Service name without version prefix.
    pub name: String,
    /// Optional service version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Versioned full name (`math`, `v2.math`).
    #[serde(rename = "fullName")]
    pub full_name: String,
    /// Opaque service settings.
    #[serde(default)]
    pub settings: Value,
    /// Actions by qualified name.
    #[serde(default)]
    pub actions: BTreeMap<String, ActionInfo>,
    /// Event subscriptions by event name.
    #[serde(default)]
    pub events: BTreeMap<String, EventInfo>,
}

/// INFO payload: a node's full self-description.
///
/// INFO always carries the complete service list; receivers reconcile by
/// diffing against stored state rather than applying deltas.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct InfoPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id.
    pub sender: String,
    /// Full service snapshot.
    pub services: Vec<ServiceInfo>,
    /// IP addresses the node is reachable on.
    #[serde(rename = "ipList", default)]
    pub ip_list: Vec<String>,
    /// Client/runtime description.
    pub client: ClientInfo,
    /// Broker configuration snapshot (namespace etc.).
    #[serde(default)]
    pub config: Value,
    /// Seconds since the sending broker started.
    #[serde(default)]
    pub uptime: u64,
}

/// HEARTBEAT payload: periodic liveness beacon.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HeartbeatPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id.
    pub sender: String,
    /// CPU usage percentage, when the sender measures it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
}

/// DISCOVER payload: asks the receiver to publish its INFO.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DiscoverPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id.
    pub sender: String,
}

/// REQUEST payload: a remote action invocation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RequestPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id.
    pub sender: String,
    /// Correlation id, echoed back in the RESPONSE (the caller context's
    /// own id).
    pub id: String,
    /// Fully qualified action name.
    pub action: String,
    /// Action parameters.
    #[serde(default)]
    pub params: Value,
    /// Propagated metadata.
    #[serde(default)]
    pub meta: Value,
    /// Remaining timeout budget in milliseconds.
    pub timeout: u64,
    /// Depth of the call graph (1 for a root call).
    pub level: u32,
    /// Whether metrics are enabled for this call chain.
    #[serde(default)]
    pub metrics: bool,
    /// Id of the spawning context, if any.
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Id shared by the whole call tree (the root context's id).
    #[serde(rename = "requestID")]
    pub request_id: String,
}

/// RESPONSE payload: outcome of a remote invocation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResponsePayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id (the executor).
    pub sender: String,
    /// Correlation id copied from the REQUEST.
    pub id: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error envelope on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

/// EVENT payload: delivery of an emitted or broadcast event.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EventPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id (the emitter).
    pub sender: String,
    /// Event name.
    pub event: String,
    /// Event payload data.
    #[serde(default)]
    pub data: Value,
    /// Consumer groups the receiver must deliver to locally; `None` means
    /// every local subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    /// Distinguishes broadcast fan-out from group-balanced delivery so the
    /// receiver replays the right local fan-out.
    #[serde(default)]
    pub broadcast: bool,
}

/// DISCONNECT payload: graceful departure notice.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DisconnectPayload {
    /// Protocol version.
    pub ver: String,
    /// Departing node id.
    pub sender: String,
}

/// PING payload: latency probe.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PingPayload {
    /// Protocol version.
    pub ver: String,
    /// Sending node id.
    pub sender: String,
    /// Sender's clock at send time, unix milliseconds.
    pub time: u64,
}

/// PONG payload: latency probe reply.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PongPayload {
    /// Protocol version.
    pub ver: String,
    /// Replying node id.
    pub sender: String,
    /// The `time` field copied from the PING.
    pub time: u64,
    /// Receiver's clock when the PING arrived, unix milliseconds.
    pub arrived: u64,
}

/// Tagged union over all packet payloads.
///
/// # Examples
///
/// ```rust
/// use swarmbus::packet::{HeartbeatPayload, Packet, PacketKind, PROTOCOL_VERSION};
///
/// let packet = Packet::Heartbeat(HeartbeatPayload {
///     ver: PROTOCOL_VERSION.to_string(),
///     sender: "node-1".to_string(),
///     cpu: Some(12.5),
/// });
/// assert_eq!(packet.kind(), PacketKind::Heartbeat);
/// assert_eq!(packet.sender(), "node-1");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Full node + service snapshot.
    Info(InfoPayload),
    /// Periodic liveness beacon.
    Heartbeat(HeartbeatPayload),
    /// Request for a peer's INFO.
    Discover(DiscoverPayload),
    /// Remote action invocation.
    Request(RequestPayload),
    /// Result of a remote invocation.
    Response(ResponsePayload),
    /// Event delivery.
    Event(EventPayload),
    /// Graceful departure notice.
    Disconnect(DisconnectPayload),
    /// Latency probe.
    Ping(PingPayload),
    /// Latency probe reply.
    Pong(PongPayload),
}

impl Packet {
    /// Returns the kind of this packet.
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Info(_) => PacketKind::Info,
            Self::Heartbeat(_) => PacketKind::Heartbeat,
            Self::Discover(_) => PacketKind::Discover,
            Self::Request(_) => PacketKind::Request,
            Self::Response(_) => PacketKind::Response,
            Self::Event(_) => PacketKind::Event,
            Self::Disconnect(_) => PacketKind::Disconnect,
            Self::Ping(_) => PacketKind::Ping,
            Self::Pong(_) => PacketKind::Pong,
        }
    }

    /// Returns the sending node id.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            Self::Info(p) => &p.sender,
            Self::Heartbeat(p) => &p.sender,
            Self::Discover(p) => &p.sender,
            Self::Request(p) => &p.sender,
            Self::Response(p) => &p.sender,
            Self::Event(p) => &p.sender,
            Self::Disconnect(p) => &p.sender,
            Self::Ping(p) => &p.sender,
            Self::Pong(p) => &p.sender,
        }
    }
}

/// Returns the current unix time in milliseconds.
///
/// Used for PING/PONG timestamps; wall-clock, not monotonic.
#[must_use]
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_rendering_without_namespace() {
        assert_eq!(Topic::Info.render(""), "SB.INFO");
        assert_eq!(
            Topic::Event("node-1".to_string()).render(""),
            "SB.EVENT.node-1"
        );
        assert_eq!(
            Topic::Request("node-1".to_string()).render(""),
            "SB.REQ.node-1"
        );
        assert_eq!(
            Topic::Pong("node-2".to_string()).render(""),
            "SB.PONG.node-2"
        );
    }

    #[test]
    fn test_topic_rendering_with_namespace() {
        assert_eq!(Topic::Heartbeat.render("dev"), "SB-dev.HEARTBEAT");
        assert_eq!(
            Topic::DiscoverTargeted("n".to_string()).render("dev"),
            "SB-dev.DISCOVER.n"
        );
    }

    #[test]
    fn test_topic_kind_mapping() {
        assert_eq!(Topic::Info.kind(), PacketKind::Info);
        assert_eq!(
            Topic::InfoTargeted("n".to_string()).kind(),
            PacketKind::Info
        );
        assert_eq!(Topic::Ping.kind(), PacketKind::Ping);
        assert_eq!(
            Topic::Response("n".to_string()).kind(),
            PacketKind::Response
        );
    }

    #[test]
    fn test_request_payload_wire_field_names() {
        let payload = RequestPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: "node-a".to_string(),
            id: "ctx-1".to_string(),
            action: "math.add".to_string(),
            params: serde_json::json!({ "a": 1 }),
            meta: Value::Null,
            timeout: 5000,
            level: 2,
            metrics: false,
            parent_id: Some("ctx-0".to_string()),
            request_id: "req-1".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["parentID"], "ctx-0");
        assert_eq!(json["requestID"], "req-1");
        assert!(json.get("parent_id").is_none());
    }

    #[test]
    fn test_event_payload_defaults() {
        let json = serde_json::json!({
            "ver": "1",
            "sender": "node-a",
            "event": "user.created",
            "data": { "id": 7 }
        });
        let payload: EventPayload = serde_json::from_value(json).unwrap();
        assert!(payload.groups.is_none());
        assert!(!payload.broadcast);
    }

    #[test]
    fn test_packet_sender_accessor() {
        let packet = Packet::Disconnect(DisconnectPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: "node-x".to_string(),
        });
        assert_eq!(packet.sender(), "node-x");
        assert_eq!(packet.kind(), PacketKind::Disconnect);
    }
}

// Made with Bob
