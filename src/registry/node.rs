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

//! Known nodes and their liveness.

use crate::packet::{ClientInfo, InfoPayload};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// A broker process in the cluster.
///
/// Nodes are created on the first INFO packet from a peer (or at startup
/// for the local node) and mutated only by INFO, HEARTBEAT, and disconnect
/// events. A disconnected node is kept in memory with `available = false`
/// as a tombstone, so late packets cannot recreate stale entries.
#[derive(Clone, Debug)]
pub struct Node {
    /// Cluster-unique node id.
    pub id: String,
    /// Whether the node is currently reachable.
    pub available: bool,
    /// Whether this is the local node.
    pub local: bool,
    /// When the last HEARTBEAT (or INFO) from this node arrived.
    pub last_heartbeat_at: Instant,
    /// CPU usage reported in the last heartbeat.
    pub cpu_usage: Option<f64>,
    /// Addresses the node reported itself reachable on.
    pub ip_list: Vec<String>,
    /// Client/runtime description.
    pub client: ClientInfo,
    /// Seconds of uptime reported in the last INFO.
    pub uptime_secs: u64,
    /// Configuration snapshot reported in the last INFO.
    pub config: Value,
    /// When the node was last marked unavailable.
    pub offline_since: Option<Instant>,
}

impl Node {
    /// Creates the local node entry.
    #[must_use]
    pub fn new_local(id: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            available: true,
            local: true,
            last_heartbeat_at: Instant::now(),
            cpu_usage: None,
            ip_list: Vec::new(),
            client: ClientInfo::default(),
            uptime_secs: 0,
            config,
            offline_since: None,
        }
    }

    /// Creates a remote node entry from its first INFO packet.
    #[must_use]
    pub fn from_info(info: &InfoPayload) -> Self {
        Self {
            id: info.sender.clone(),
            available: true,
            local: false,
            last_heartbeat_at: Instant::now(),
            cpu_usage: None,
            ip_list: info.ip_list.clone(),
            client: info.client.clone(),
            uptime_secs: info.uptime,
            config: info.config.clone(),
            offline_since: None,
        }
    }

    /// Applies a fresh INFO snapshot to an existing entry.
    ///
    /// Returns `true` when the node was unavailable before (a reconnect).
    pub fn apply_info(&mut self, info: &InfoPayload) -> bool {
        let reconnected = !self.available;
        self.available = true;
        self.offline_since = None;
        self.last_heartbeat_at = Instant::now();
        self.ip_list = info.ip_list.clone();
        self.client = info.client.clone();
        self.uptime_secs = info.uptime;
        self.config = info.config.clone();
        reconnected
    }

    /// Applies a heartbeat: refresh liveness and CPU usage.
    pub fn beat(&mut self, cpu: Option<f64>) {
        self.available = true;
        self.offline_since = None;
        self.last_heartbeat_at = Instant::now();
        self.cpu_usage = cpu;
    }

    /// Marks the node unavailable, keeping the entry as a tombstone.
    ///
    /// Returns `true` when the node was available before.
    pub fn mark_unavailable(&mut self) -> bool {
        let was_available = self.available;
        self.available = false;
        if was_available {
            self.offline_since = Some(Instant::now());
        }
        was_available
    }
}

/// All nodes known to this broker, the local one included.
#[derive(Debug, Default)]
pub struct NodeCatalog {
    nodes: HashMap<String, Node>,
}

impl NodeCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Looks up a node mutably.
    pub fn get_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Inserts or replaces a node entry.
    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Returns whether a node exists and is available.
    #[must_use]
    pub fn is_available(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|node| node.available)
    }

    /// Iterates over all known nodes.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns remote nodes whose last heartbeat is older than `timeout`.
    #[must_use]
    pub fn expired(&self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.nodes
            .values()
            .filter(|node| {
                !node.local
                    && node.available
                    && now.duration_since(node.last_heartbeat_at) > timeout
            })
            .map(|node| node.id.clone())
            .collect()
    }
}


// Made with Bob
