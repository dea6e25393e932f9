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

//! Packet serialization.
//!
//! The [`Serializer`] trait is the pluggable seam between the packet
//! shapes and their byte encoding. The packet kind is implied by the topic
//! a message arrives on, so deserialization takes the kind alongside the
//! bytes; both sides of a cluster must agree on the serializer.
//!
//! [`JsonSerializer`] is the provided implementation.

mod error;
mod json;
mod traits;

pub use error::{DeserializationError, SerializationError};
pub use json::JsonSerializer;
pub use traits::Serializer;
