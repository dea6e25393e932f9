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

//! Callable endpoints.
//!
//! An endpoint binds an action (or event subscription) to the node that
//! hosts it. Action endpoints carry the per-endpoint circuit breaker and
//! request/failure counters; their lifecycle follows the owning service.

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::config::CircuitBreakerConfig;
use crate::service::{ActionDescriptor, EventHandler};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One (node, service, action) triple that can serve a call.
pub struct ActionEndpoint {
    /// Node hosting the action.
    pub node_id: String,
    /// Full name of the owning service.
    pub service: String,
    /// The action descriptor (with handler for local endpoints).
    pub action: ActionDescriptor,
    /// Whether the endpoint lives on the local node.
    pub local: bool,
    /// Per-endpoint failure state machine.
    pub circuit: CircuitBreaker,
    requests: AtomicU64,
    failures: AtomicU64,
}

impl ActionEndpoint {
    /// Creates an endpoint with a fresh circuit breaker.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        service: impl Into<String>,
        action: ActionDescriptor,
        local: bool,
        circuit_config: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            service: service.into(),
            action,
            local,
            circuit: CircuitBreaker::new(circuit_config),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Records a dispatched request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful completion.
    pub fn record_success(&self) {
        self.circuit.on_success();
    }

    /// Records a countable failure (timeout, transport, rejection,
    /// disconnect).
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.circuit.on_failure();
    }

    /// Total requests dispatched to this endpoint.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Total countable failures recorded on this endpoint.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// When the last countable failure happened.
    #[must_use]
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.circuit.last_failure_at()
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.circuit.state()
    }
}

impl fmt::Debug for ActionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEndpoint")
            .field("node_id", &self.node_id)
            .field("action", &self.action.name)
            .field("local", &self.local)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// One subscriber of an event.
pub struct EventEndpoint {
    /// Node hosting the subscription.
    pub node_id: String,
    /// Full name of the subscribing service.
    pub service: String,
    /// Consumer group (defaults to the service name).
    pub group: String,
    /// Whether the subscriber lives on the local node.
    pub local: bool,
    /// Handler, local subscribers only.
    pub handler: Option<EventHandler>,
}

impl fmt::Debug for EventEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEndpoint")
            .field("node_id", &self.node_id)
            .field("service", &self.service)
            .field("group", &self.group)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ActionDescriptor {
        ActionDescriptor {
            name: name.to_string(),
            cache: false,
            params: None,
            protected: false,
            handler: None,
            compiled: None,
        }
    }

    #[test]
    fn test_counters() {
        let endpoint = ActionEndpoint::new(
            "node-a",
            "math",
            descriptor("math.add"),
            false,
            &CircuitBreakerConfig::default(),
        );
        endpoint.record_request();
        endpoint.record_request();
        endpoint.record_failure();
        assert_eq!(endpoint.requests(), 2);
        assert_eq!(endpoint.failures(), 1);
        assert!(endpoint.last_failure_at().is_some());
    }

    #[test]
    fn test_failures_drive_circuit() {
        let endpoint = ActionEndpoint::new(
            "node-a",
            "math",
            descriptor("math.add"),
            false,
            &CircuitBreakerConfig::default().with_max_failures(2),
        );
        assert_eq!(endpoint.state(), CircuitState::Closed);
        endpoint.record_failure();
        endpoint.record_failure();
        assert_eq!(endpoint.state(), CircuitState::Open);
    }
}

// Made with Bob
