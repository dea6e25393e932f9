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

//! Serialization error types.

use crate::packet::PacketKind;
use thiserror::Error;

/// Errors while encoding a packet.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The underlying encoder rejected the packet.
    #[error("failed to encode {kind} packet: {reason}")]
    EncodeFailed {
        /// The packet kind being encoded.
        kind: PacketKind,
        /// Encoder error description.
        reason: String,
    },
}

/// Errors while decoding a packet.
#[derive(Debug, Error)]
pub enum DeserializationError {
    /// The bytes did not parse as the expected payload shape.
    #[error("failed to decode {kind} packet: {reason}")]
    DecodeFailed {
        /// The packet kind implied by the topic.
        kind: PacketKind,
        /// Decoder error description.
        reason: String,
    },
}

// Made with Bob
