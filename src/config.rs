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

//! Broker configuration.

use crate::strategy::StrategyKind;
use std::time::Duration;

/// Configuration for a [`Broker`](crate::Broker).
///
/// Defaults are suitable for development: five-second request timeout, no
/// retries, heartbeats every five seconds with a fifteen-second liveness
/// window, and round-robin endpoint selection preferring local endpoints.
///
/// # Examples
///
/// ```rust
/// use swarmbus::BrokerConfig;
/// use std::time::Duration;
///
/// // Defaults with a generated node id.
/// let config = BrokerConfig::default();
///
/// // Customized via the builder methods.
/// let config = BrokerConfig::new("node-a")
///     .with_namespace("staging")
///     .with_request_timeout(Duration::from_millis(500))
///     .with_request_retry(2);
/// ```
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Cluster-unique node id.
    ///
    /// Default: `node-<pid>`, which is unique per host but not per
    /// cluster; multi-host deployments should set an explicit id.
    pub node_id: String,

    /// Namespace isolating this cluster on a shared transport substrate.
    ///
    /// Brokers only exchange packets with peers in the same namespace.
    ///
    /// Default: empty (the unnamed namespace)
    pub namespace: String,

    /// How long a call waits for a response before failing with
    /// `REQUEST_TIMEOUT`.
    ///
    /// Default: 5 seconds
    pub request_timeout: Duration,

    /// How many times a retryable call failure is retried against a
    /// (preferably different) endpoint.
    ///
    /// Default: 0 (no retries)
    pub request_retry: u32,

    /// Interval between outgoing HEARTBEAT packets.
    ///
    /// Default: 5 seconds
    pub heartbeat_interval: Duration,

    /// Remote nodes whose last heartbeat is older than this are marked
    /// disconnected (`unexpected = true`).
    ///
    /// Default: 15 seconds
    pub heartbeat_timeout: Duration,

    /// Prefer a local endpoint over remote ones when both can serve a
    /// call.
    ///
    /// Default: true
    pub prefer_local: bool,

    /// Endpoint selection strategy used when several remote endpoints are
    /// available.
    ///
    /// Default: round-robin
    pub strategy: StrategyKind,

    /// Per-endpoint circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Register the built-in `$node` service at start.
    ///
    /// Default: true
    pub internal_services: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", std::process::id()),
            namespace: String::new(),
            request_timeout: Duration::from_secs(5),
            request_retry: 0,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            prefer_local: true,
            strategy: StrategyKind::RoundRobin,
            circuit_breaker: CircuitBreakerConfig::default(),
            internal_services: true,
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration with the given node id and defaults for
    /// everything else.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swarmbus::BrokerConfig;
    ///
    /// let config = BrokerConfig::new("node-a");
    /// assert_eq!(config.node_id, "node-a");
    /// ```
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Sets the cluster namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the per-call response timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry budget for retryable call failures.
    #[must_use]
    pub fn with_request_retry(mut self, retries: u32) -> Self {
        self.request_retry = retries;
        self
    }

    /// Sets the heartbeat send interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the remote-node liveness window.
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Enables or disables preferring local endpoints.
    #[must_use]
    pub fn with_prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }

    /// Sets the endpoint selection strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    /// Enables or disables the built-in `$node` service.
    #[must_use]
    pub fn with_internal_services(mut self, enabled: bool) -> Self {
        self.internal_services = enabled;
        self
    }
}

/// Per-endpoint circuit breaker settings.
///
/// A circuit opens after `max_failures` countable failures inside
/// `window`; after `half_open_timeout` it admits a single probe request
/// and closes again only if the probe succeeds.
///
/// # Examples
///
/// ```rust
/// use swarmbus::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_max_failures(3)
///     .with_half_open_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_failures, 3);
/// ```
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breaking is active at all.
    ///
    /// Default: true
    pub enabled: bool,

    /// Countable failures within `window` that open the circuit.
    ///
    /// Default: 5
    pub max_failures: u32,

    /// Sliding failure-counting window.
    ///
    /// Default: 60 seconds
    pub window: Duration,

    /// Time an open circuit waits before admitting a probe.
    ///
    /// Default: 10 seconds
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 5,
            window: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(10),
        }
    }
}

impl CircuitBreakerConfig {
    /// Enables or disables circuit breaking.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Sets the failure-counting window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the open-to-half-open timeout.
    #[must_use]
    pub fn with_half_open_timeout(mut self, timeout: Duration) -> Self {
        self.half_open_timeout = timeout;
        self
    }
}


// Made with Bob
