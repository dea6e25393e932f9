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

//! Endpoint lists per action name.

use crate::config::CircuitBreakerConfig;
use crate::registry::endpoint::ActionEndpoint;
use crate::service::ActionDescriptor;
use crate::strategy::{Strategy, StrategyKind};
use std::collections::HashMap;
use std::sync::Arc;

/// All endpoints able to serve one action name, plus the strategy that
/// balances among them.
pub struct ActionEntry {
    /// Qualified action name.
    pub name: String,
    endpoints: Vec<Arc<ActionEndpoint>>,
    strategy: Box<dyn Strategy>,
}

impl ActionEntry {
    fn new(name: String, strategy: Box<dyn Strategy>) -> Self {
        Self {
            name,
            endpoints: Vec::new(),
            strategy,
        }
    }

    /// The endpoints of this entry, one per hosting node.
    #[must_use]
    pub fn endpoints(&self) -> &[Arc<ActionEndpoint>] {
        &self.endpoints
    }

    /// The strategy balancing this entry.
    #[must_use]
    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    /// Returns the endpoint hosted by a specific node.
    #[must_use]
    pub fn endpoint_for(&self, node_id: &str) -> Option<&Arc<ActionEndpoint>> {
        self.endpoints.iter().find(|ep| ep.node_id == node_id)
    }

    /// Inserts or updates the endpoint of one node.
    ///
    /// At most one endpoint per node is kept. A remote re-announcement
    /// with an unchanged descriptor keeps the existing endpoint (and its
    /// circuit state) so reconcile is idempotent; local registrations
    /// always replace, because the handler may have changed.
    fn upsert(
        &mut self,
        node_id: &str,
        service: &str,
        action: ActionDescriptor,
        local: bool,
        circuit_config: &CircuitBreakerConfig,
    ) {
        if let Some(pos) = self.endpoints.iter().position(|ep| ep.node_id == node_id) {
            let existing = &self.endpoints[pos];
            if !local && existing.action.to_info() == action.to_info() {
                return;
            }
            self.endpoints[pos] = Arc::new(ActionEndpoint::new(
                node_id,
                service,
                action,
                local,
                circuit_config,
            ));
        } else {
            self.endpoints.push(Arc::new(ActionEndpoint::new(
                node_id,
                service,
                action,
                local,
                circuit_config,
            )));
        }
    }

    fn remove_node(&mut self, node_id: &str) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|ep| ep.node_id != node_id);
        self.endpoints.len() != before
    }

    fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl std::fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEntry")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

/// Action entries by qualified action name.
#[derive(Debug)]
pub struct ActionCatalog {
    entries: HashMap<String, ActionEntry>,
    strategy_kind: StrategyKind,
}

impl ActionCatalog {
    /// Creates an empty catalog; new entries get a fresh strategy of the
    /// given kind.
    #[must_use]
    pub fn new(strategy_kind: StrategyKind) -> Self {
        Self {
            entries: HashMap::new(),
            strategy_kind,
        }
    }

    /// Looks up an action entry.
    #[must_use]
    pub fn get(&self, action: &str) -> Option<&ActionEntry> {
        self.entries.get(action)
    }

    /// Inserts or updates one node's endpoint for an action.
    pub fn upsert(
        &mut self,
        action: ActionDescriptor,
        node_id: &str,
        service: &str,
        local: bool,
        circuit_config: &CircuitBreakerConfig,
    ) {
        let entry = self
            .entries
            .entry(action.name.clone())
            .or_insert_with_key(|name| {
                ActionEntry::new(name.clone(), self.strategy_kind.create())
            });
        entry.upsert(node_id, service, action, local, circuit_config);
    }

    /// Removes one node's endpoint for one action; drops the entry when it
    /// becomes empty.
    pub fn remove(&mut self, action: &str, node_id: &str) {
        if let Some(entry) = self.entries.get_mut(action) {
            entry.remove_node(node_id);
            if entry.is_empty() {
                self.entries.remove(action);
            }
        }
    }

    /// Removes every endpoint of a node.
    pub fn remove_node(&mut self, node_id: &str) {
        self.entries.retain(|_, entry| {
            entry.remove_node(node_id);
            !entry.is_empty()
        });
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;

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

    fn catalog() -> ActionCatalog {
        ActionCatalog::new(StrategyKind::RoundRobin)
    }

    #[test]
    fn test_one_endpoint_per_node() {
        let mut catalog = catalog();
        let cb = CircuitBreakerConfig::default();
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog.upsert(descriptor("math.add"), "node-b", "math", false, &cb);
        assert_eq!(catalog.get("math.add").unwrap().endpoints().len(), 2);
    }

    #[test]
    fn test_unchanged_remote_upsert_keeps_circuit_state() {
        let mut catalog = catalog();
        let cb = CircuitBreakerConfig::default().with_max_failures(1);
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog
            .get("math.add")
            .unwrap()
            .endpoint_for("node-a")
            .unwrap()
            .record_failure();
        // Same descriptor re-announced (the INFO reconcile path): the
        // tripped circuit must survive.
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        assert_eq!(
            catalog
                .get("math.add")
                .unwrap()
                .endpoint_for("node-a")
                .unwrap()
                .state(),
            CircuitState::Open
        );
    }

    #[test]
    fn test_changed_descriptor_replaces_endpoint() {
        let mut catalog = catalog();
        let cb = CircuitBreakerConfig::default().with_max_failures(1);
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog
            .get("math.add")
            .unwrap()
            .endpoint_for("node-a")
            .unwrap()
            .record_failure();

        let mut changed = descriptor("math.add");
        changed.cache = true;
        catalog.upsert(changed, "node-a", "math", false, &cb);
        let endpoint = catalog
            .get("math.add")
            .unwrap()
            .endpoint_for("node-a")
            .unwrap();
        assert!(endpoint.action.cache);
        assert_eq!(endpoint.state(), CircuitState::Closed);
    }

    #[test]
    fn test_empty_entry_is_dropped() {
        let mut catalog = catalog();
        let cb = CircuitBreakerConfig::default();
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog.remove("math.add", "node-a");
        assert!(catalog.get("math.add").is_none());
    }

    #[test]
    fn test_remove_node_sweeps_all_entries() {
        let mut catalog = catalog();
        let cb = CircuitBreakerConfig::default();
        catalog.upsert(descriptor("math.add"), "node-a", "math", false, &cb);
        catalog.upsert(descriptor("math.sub"), "node-a", "math", false, &cb);
        catalog.upsert(descriptor("math.add"), "node-b", "math", false, &cb);
        catalog.remove_node("node-a");
        assert!(catalog.get("math.sub").is_none());
        assert_eq!(catalog.get("math.add").unwrap().endpoints().len(), 1);
    }
}

// Made with Bob
