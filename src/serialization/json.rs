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

//! JSON packet serializer.

use crate::packet::{Packet, PacketKind};
use crate::serialization::{DeserializationError, SerializationError, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// JSON packet encoding.
///
/// Human-readable, cross-language, and the default choice. Binary-heavy
/// workloads should plug in a binary serializer behind the same trait.
///
/// # Examples
///
/// ```rust
/// use swarmbus::packet::{HeartbeatPayload, Packet, PacketKind, PROTOCOL_VERSION};
/// use swarmbus::serialization::{JsonSerializer, Serializer};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let serializer = JsonSerializer::default();
/// let packet = Packet::Heartbeat(HeartbeatPayload {
///     ver: PROTOCOL_VERSION.to_string(),
///     sender: "node-1".to_string(),
///     cpu: None,
/// });
/// let bytes = serializer.serialize(&packet)?;
/// assert_eq!(serializer.deserialize(&bytes, PacketKind::Heartbeat)?, packet);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer;

fn encode<T: Serialize>(payload: &T, kind: PacketKind) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(payload).map_err(|err| SerializationError::EncodeFailed {
        kind,
        reason: err.to_string(),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8], kind: PacketKind) -> Result<T, DeserializationError> {
    serde_json::from_slice(bytes).map_err(|err| DeserializationError::DecodeFailed {
        kind,
        reason: err.to_string(),
    })
}

impl Serializer for JsonSerializer {
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, SerializationError> {
        let kind = packet.kind();
        match packet {
            Packet::Info(p) => encode(p, kind),
            Packet::Heartbeat(p) => encode(p, kind),
            Packet::Discover(p) => encode(p, kind),
            Packet::Request(p) => encode(p, kind),
            Packet::Response(p) => encode(p, kind),
            Packet::Event(p) => encode(p, kind),
            Packet::Disconnect(p) => encode(p, kind),
            Packet::Ping(p) => encode(p, kind),
            Packet::Pong(p) => encode(p, kind),
        }
    }

    fn deserialize(
        &self,
        bytes: &[u8],
        kind: PacketKind,
    ) -> Result<Packet, DeserializationError> {
        Ok(match kind {
            PacketKind::Info => Packet::Info(decode(bytes, kind)?),
            PacketKind::Heartbeat => Packet::Heartbeat(decode(bytes, kind)?),
            PacketKind::Discover => Packet::Discover(decode(bytes, kind)?),
            PacketKind::Request => Packet::Request(decode(bytes, kind)?),
            PacketKind::Response => Packet::Response(decode(bytes, kind)?),
            PacketKind::Event => Packet::Event(decode(bytes, kind)?),
            PacketKind::Disconnect => Packet::Disconnect(decode(bytes, kind)?),
            PacketKind::Ping => Packet::Ping(decode(bytes, kind)?),
            PacketKind::Pong => Packet::Pong(decode(bytes, kind)?),
        })
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorEnvelope;
    use crate::packet::{RequestPayload, ResponsePayload, PROTOCOL_VERSION};
    use serde_json::{json, Value};

    #[test]
    fn test_request_round_trip() {
        let serializer = JsonSerializer::default();
        let packet = Packet::Request(RequestPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: "node-a".to_string(),
            id: "ctx-1".to_string(),
            action: "math.add".to_string(),
            params: json!({ "a": 2, "b": 3 }),
            meta: json!({ "user": "alice" }),
            timeout: 5000,
            level: 1,
            metrics: false,
            parent_id: None,
            request_id: "ctx-1".to_string(),
        });
        let bytes = serializer.serialize(&packet).unwrap();
        let decoded = serializer.deserialize(&bytes, PacketKind::Request).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_error_response_round_trip() {
        let serializer = JsonSerializer::default();
        let packet = Packet::Response(ResponsePayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: "node-b".to_string(),
            id: "ctx-1".to_string(),
            success: false,
            data: None,
            error: Some(ErrorEnvelope {
                name: "RequestTimeoutError".to_string(),
                message: "request 'math.add' timed out after 100ms".to_string(),
                code: 504,
                kind: "REQUEST_TIMEOUT".to_string(),
                data: Value::Null,
                stack: None,
                node_id: Some("node-b".to_string()),
            }),
        });
        let bytes = serializer.serialize(&packet).unwrap();
        let decoded = serializer
            .deserialize(&bytes, PacketKind::Response)
            .unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_wrong_kind_fails() {
        let serializer = JsonSerializer::default();
        let packet = Packet::Heartbeat(crate::packet::HeartbeatPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: "node-a".to_string(),
            cpu: None,
        });
        let bytes = serializer.serialize(&packet).unwrap();
        // A heartbeat body has no `id`/`action`; decoding it as a request
        // must fail rather than produce a half-filled packet.
        assert!(serializer.deserialize(&bytes, PacketKind::Request).is_err());
    }

    #[test]
    fn test_garbage_fails() {
        let serializer = JsonSerializer::default();
        assert!(serializer
            .deserialize(b"not json", PacketKind::Info)
            .is_err());
    }
}

// Made with Bob
