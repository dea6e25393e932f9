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

//! Broker error kinds and the wire error envelope.
//!
//! Errors are layered: [`TransportError`](crate::transport::TransportError)
//! and [`SerializationError`](crate::serialization::SerializationError)
//! describe failures at the edges and convert upward into [`BrokerError`],
//! the kind-tagged error surfaced to callers.
//!
//! Each kind carries a stable `type` string and numeric code on the wire.
//! When a remote handler fails, the executing node converts the error into
//! an [`ErrorEnvelope`] inside the RESPONSE packet; the calling node
//! rehydrates an error of the same kind, preserving the node id of the
//! original thrower.
//!
//! # Retryability
//!
//! Timeouts, circuit rejections, transport failures, and node disconnects
//! are retryable: the call may succeed against another endpoint or on a
//! later attempt. Validation failures, unknown actions, and user-thrown
//! errors are not.

use crate::serialization::{DeserializationError, SerializationError};
use crate::transport::TransportError;
use crate::validator::ValidationIssue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by broker operations.
///
/// Every variant maps onto one of the protocol's error kinds (the `type`
/// string carried on the wire). Kinds, not concrete types, are what travel
/// between nodes: a remote `REQUEST_TIMEOUT` rehydrates on the caller as
/// [`BrokerError::RequestTimeout`] with the origin node preserved.
///
/// # Examples
///
/// ```rust
/// use swarmbus::BrokerError;
///
/// let err = BrokerError::ServiceNotFound {
///     action: "math.add".to_string(),
/// };
/// assert_eq!(err.kind(), "SERVICE_NOT_FOUND");
/// assert_eq!(err.code(), 404);
/// assert!(!err.retryable());
/// ```
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No action entry exists anywhere in the cluster for the given name.
    #[error("service not found for action '{action}'")]
    ServiceNotFound {
        /// The action name that was requested.
        action: String,
    },

    /// An action entry exists, but no endpoint survived availability
    /// filtering (nodes offline, circuits open, or a pinned node missing).
    #[error("service not available for action '{action}'")]
    ServiceNotAvailable {
        /// The action name that was requested.
        action: String,
        /// The pinned node id, when the call requested one.
        node_id: Option<String>,
    },

    /// The call did not receive a response within its timeout.
    ///
    /// The remote node may still execute the request; no cancellation is
    /// sent. Callers must be idempotent or tolerate duplicate execution.
    #[error("request '{action}' timed out after {elapsed:?}")]
    RequestTimeout {
        /// The action name that was called.
        action: String,
        /// The node the request was sent to, if one was selected.
        node_id: Option<String>,
        /// The timeout that elapsed.
        elapsed: Duration,
    },

    /// The selected endpoint's circuit breaker is open.
    #[error("request '{action}' rejected by node '{node_id}'")]
    RequestRejected {
        /// The action name that was called.
        action: String,
        /// The node whose circuit rejected the request.
        node_id: String,
    },

    /// The parameters did not satisfy the action's schema.
    #[error("parameters of '{action}' failed validation")]
    ValidationFailed {
        /// The action name that was called.
        action: String,
        /// The individual schema violations.
        issues: Vec<ValidationIssue>,
    },

    /// A transport-layer failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A packet could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// A packet could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(#[from] DeserializationError),

    /// The target node disconnected while the request was in flight.
    #[error("node '{node_id}' disconnected")]
    NodeDisconnected {
        /// The node that went away.
        node_id: String,
    },

    /// The local broker is shutting down; in-flight requests are rejected.
    #[error("broker is stopping")]
    BrokerStopping,

    /// A user-thrown error from an action handler.
    ///
    /// Custom errors cross the wire with their name, message, code, and
    /// attached data intact.
    #[error("{name}: {message}")]
    Custom {
        /// The error name chosen by the handler.
        name: String,
        /// Human-readable message.
        message: String,
        /// Numeric code (defaults to 500 for handler errors).
        code: u16,
        /// Structured data attached by the handler.
        data: Value,
        /// The node the error originated on, when known.
        node_id: Option<String>,
    },
}

impl BrokerError {
    /// Creates a user error with the given name and message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swarmbus::BrokerError;
    ///
    /// let err = BrokerError::custom("InsufficientFunds", "balance too low");
    /// assert_eq!(err.kind(), "CUSTOM");
    /// ```
    pub fn custom(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Custom {
            name: name.into(),
            message: message.into(),
            code: 500,
            data: Value::Null,
            node_id: None,
        }
    }

    /// Returns the stable kind string carried as `type` on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            Self::ServiceNotAvailable { .. } => "SERVICE_NOT_AVAILABLE",
            Self::RequestTimeout { .. } => "REQUEST_TIMEOUT",
            Self::RequestRejected { .. } => "REQUEST_REJECTED",
            Self::ValidationFailed { .. } => "VALIDATION_ERROR",
            Self::Transport(_) | Self::Serialization(_) | Self::Deserialization(_) => {
                "TRANSPORT_ERROR"
            }
            Self::NodeDisconnected { .. } => "NODE_DISCONNECTED",
            Self::BrokerStopping => "BROKER_STOPPING",
            Self::Custom { .. } => "CUSTOM",
        }
    }

    /// Returns the numeric code carried on the wire.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::ServiceNotFound { .. } | Self::ServiceNotAvailable { .. } => 404,
            Self::RequestTimeout { .. } => 504,
            Self::RequestRejected { .. } | Self::BrokerStopping => 503,
            Self::ValidationFailed { .. } => 422,
            Self::Transport(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::NodeDisconnected { .. } => 502,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Returns `true` if a retry against another endpoint (or the same one,
    /// when it is the only one) may succeed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swarmbus::BrokerError;
    /// use std::time::Duration;
    ///
    /// let timeout = BrokerError::RequestTimeout {
    ///     action: "math.add".to_string(),
    ///     node_id: None,
    ///     elapsed: Duration::from_millis(100),
    /// };
    /// assert!(timeout.retryable());
    ///
    /// let not_found = BrokerError::ServiceNotFound {
    ///     action: "math.add".to_string(),
    /// };
    /// assert!(!not_found.retryable());
    /// ```
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. }
                | Self::RequestRejected { .. }
                | Self::Transport(_)
                | Self::NodeDisconnected { .. }
        )
    }

    /// Returns `true` if this failure counts against the endpoint's
    /// circuit breaker.
    ///
    /// Validation failures and user errors describe the request, not the
    /// endpoint, and never trip a circuit.
    #[must_use]
    pub const fn counts_for_circuit(&self) -> bool {
        self.retryable()
    }

    /// Returns the node id the error originated on, when known.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::ServiceNotAvailable { node_id, .. }
            | Self::RequestTimeout { node_id, .. }
            | Self::Custom { node_id, .. } => node_id.as_deref(),
            Self::RequestRejected { node_id, .. } | Self::NodeDisconnected { node_id } => {
                Some(node_id)
            }
            _ => None,
        }
    }

    /// Converts this error into its wire envelope.
    ///
    /// `local_node` is recorded as the origin unless the error already
    /// carries one (a relayed error keeps its original thrower).
    #[must_use]
    pub fn to_envelope(&self, local_node: &str) -> ErrorEnvelope {
        let (name, data) = match self {
            Self::ValidationFailed { issues, .. } => (
                "ValidationError".to_string(),
                serde_json::to_value(issues).unwrap_or(Value::Null),
            ),
            Self::Custom { name, data, .. } => (name.clone(), data.clone()),
            other => (default_name(other.kind()).to_string(), Value::Null),
        };
        ErrorEnvelope {
            name,
            message: self.to_string(),
            code: self.code(),
            kind: self.kind().to_string(),
            data,
            stack: None,
            node_id: self
                .node_id()
                .map(str::to_string)
                .or_else(|| Some(local_node.to_string())),
        }
    }
}

/// Maps a kind string to the conventional error name used on the wire.
fn default_name(kind: &str) -> &'static str {
    match kind {
        "SERVICE_NOT_FOUND" => "ServiceNotFoundError",
        "SERVICE_NOT_AVAILABLE" => "ServiceNotAvailableError",
        "REQUEST_TIMEOUT" => "RequestTimeoutError",
        "REQUEST_REJECTED" => "RequestRejectedError",
        "VALIDATION_ERROR" => "ValidationError",
        "NODE_DISCONNECTED" => "NodeDisconnectedError",
        "BROKER_STOPPING" => "BrokerStoppingError",
        "TRANSPORT_ERROR" => "TransportError",
        _ => "BrokerError",
    }
}

/// Wire representation of an error inside a RESPONSE packet.
///
/// The envelope is what actually crosses node boundaries. It carries enough
/// to rehydrate an error of the same kind on the caller, including the node
/// id of the original thrower.
///
/// # Examples
///
/// ```rust
/// use swarmbus::{BrokerError, ErrorEnvelope};
///
/// let err = BrokerError::custom("OutOfStock", "item 42 unavailable");
/// let env = err.to_envelope("node-a");
/// assert_eq!(env.kind, "CUSTOM");
/// assert_eq!(env.node_id.as_deref(), Some("node-a"));
///
/// let back = env.into_error();
/// assert_eq!(back.kind(), "CUSTOM");
/// assert_eq!(back.node_id(), Some("node-a"));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    /// Error name (e.g. `RequestTimeoutError` or a user-chosen name).
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Numeric code.
    pub code: u16,
    /// Stable kind string (`SERVICE_NOT_FOUND`, `REQUEST_TIMEOUT`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Structured data attached to the error.
    #[serde(default)]
    pub data: Value,
    /// Stack trace from the origin, when the origin captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Node the error originated on.
    #[serde(rename = "nodeID")]
    pub node_id: Option<String>,
}

impl ErrorEnvelope {
    /// Rehydrates a [`BrokerError`] of the same kind as this envelope.
    ///
    /// Unknown kinds fall back to [`BrokerError::Custom`] so that errors
    /// from newer peers are preserved rather than dropped.
    #[must_use]
    pub fn into_error(self) -> BrokerError {
        match self.kind.as_str() {
            "SERVICE_NOT_FOUND" => BrokerError::ServiceNotFound {
                action: action_from_message(&self.message),
            },
            "SERVICE_NOT_AVAILABLE" => BrokerError::ServiceNotAvailable {
                action: action_from_message(&self.message),
                node_id: self.node_id,
            },
            "REQUEST_TIMEOUT" => BrokerError::RequestTimeout {
                action: action_from_message(&self.message),
                node_id: self.node_id,
                elapsed: Duration::ZERO,
            },
            "REQUEST_REJECTED" => BrokerError::RequestRejected {
                action: action_from_message(&self.message),
                node_id: self.node_id.unwrap_or_default(),
            },
            "VALIDATION_ERROR" => BrokerError::ValidationFailed {
                action: action_from_message(&self.message),
                issues: serde_json::from_value(self.data).unwrap_or_default(),
            },
            "NODE_DISCONNECTED" => BrokerError::NodeDisconnected {
                node_id: self.node_id.unwrap_or_default(),
            },
            "BROKER_STOPPING" => BrokerError::BrokerStopping,
            _ => BrokerError::Custom {
                name: self.name,
                message: self.message,
                code: self.code,
                data: self.data,
                node_id: self.node_id,
            },
        }
    }
}

/// Pulls the quoted action name back out of a rendered message.
///
/// Wire messages are rendered by `Display` above, which always quotes the
/// action name; anything else degrades to an empty name rather than an
/// error.
fn action_from_message(message: &str) -> String {
    message
        .split('\'')
        .nth(1)
        .map(str::to_string)
        .unwrap_or_default()
}
