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

//! Transport layer error types.

use thiserror::Error;

/// Errors from the transport substrate.
///
/// Transport errors are retryable at the call level: the broker may retry
/// a failed call against another endpoint, and they count against the
/// failing endpoint's circuit breaker.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An operation was attempted before `connect` (or after
    /// `disconnect`).
    #[error("transporter is not connected")]
    NotConnected,

    /// Connecting to the substrate failed.
    #[error("failed to connect: {reason}")]
    ConnectFailed {
        /// Substrate error description.
        reason: String,
    },

    /// A subscription was rejected.
    #[error("failed to subscribe to '{topic}': {reason}")]
    SubscribeFailed {
        /// The subject that was being subscribed.
        topic: String,
        /// Substrate error description.
        reason: String,
    },

    /// A publish did not go out.
    #[error("failed to publish to '{topic}': {reason}")]
    PublishFailed {
        /// The subject that was being published to.
        topic: String,
        /// Substrate error description.
        reason: String,
    },

    /// The connection dropped while the broker was running.
    #[error("transport disconnected: {reason}")]
    Disconnected {
        /// Why the connection was lost.
        reason: String,
    },
}

// Made with Bob
