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

//! Serialization trait definition.

use crate::packet::{Packet, PacketKind};
use crate::serialization::{DeserializationError, SerializationError};

/// Encodes packets to bytes and back.
///
/// Implementations must be symmetric (`deserialize(serialize(p)) == p` for
/// well-formed packets) and thread-safe. The packet kind is not encoded in
/// the bytes; it travels in the topic and is handed back to
/// [`deserialize`](Self::deserialize).
///
/// # Examples
///
/// ```rust
/// use swarmbus::packet::{DiscoverPayload, Packet, PacketKind, PROTOCOL_VERSION};
/// use swarmbus::serialization::{JsonSerializer, Serializer};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let serializer = JsonSerializer::default();
/// let packet = Packet::Discover(DiscoverPayload {
///     ver: PROTOCOL_VERSION.to_string(),
///     sender: "node-1".to_string(),
/// });
///
/// let bytes = serializer.serialize(&packet)?;
/// let decoded = serializer.deserialize(&bytes, PacketKind::Discover)?;
/// assert_eq!(packet, decoded);
/// # Ok(())
/// # }
/// ```
pub trait Serializer: Send + Sync + 'static {
    /// Encodes a packet payload to bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`SerializationError`] when the payload cannot be
    /// encoded.
    fn serialize(&self, packet: &Packet) -> Result<Vec<u8>, SerializationError>;

    /// Decodes bytes into the payload shape of the given kind.
    ///
    /// # Errors
    ///
    /// Returns a [`DeserializationError`] when the bytes are corrupt or do
    /// not match the expected shape.
    fn deserialize(&self, bytes: &[u8], kind: PacketKind)
        -> Result<Packet, DeserializationError>;

    /// Returns the serializer name, used in logs and for sanity checks
    /// when peers are configured inconsistently.
    fn name(&self) -> &'static str;
}

// Made with Bob
