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

//! Subscriber endpoint groups per event name.

use crate::registry::endpoint::EventEndpoint;
use crate::service::EventHandler;
use crate::strategy::{EndpointRef, Strategy, StrategyKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// All subscribers of one event name.
pub struct EventEntry {
    /// Event name.
    pub name: String,
    endpoints: Vec<Arc<EventEndpoint>>,
    strategy_kind: StrategyKind,
    /// One strategy per consumer group, so rotation within one group is
    /// independent of how many other groups each emission serves.
    group_strategies: Mutex<HashMap<String, Box<dyn Strategy>>>,
}

impl EventEntry {
    fn new(name: String, strategy_kind: StrategyKind) -> Self {
        Self {
            name,
            endpoints: Vec::new(),
            strategy_kind,
            group_strategies: Mutex::new(HashMap::new()),
        }
    }

    /// The subscriber endpoints, at most one per (service, node) pair.
    #[must_use]
    pub fn endpoints(&self) -> &[Arc<EventEndpoint>] {
        &self.endpoints
    }

    /// Picks one endpoint of a group via the group's strategy.
    #[must_use]
    pub fn balance<'a>(
        &self,
        group: &str,
        candidates: &[&'a Arc<EventEndpoint>],
    ) -> Option<&'a Arc<EventEndpoint>> {
        if candidates.is_empty() {
            return None;
        }
        let refs: Vec<EndpointRef<'_>> = candidates
            .iter()
            .map(|ep| EndpointRef {
                node_id: &ep.node_id,
                local: ep.local,
            })
            .collect();
        let mut strategies = self.group_strategies.lock().unwrap();
        let strategy = strategies
            .entry(group.to_string())
            .or_insert_with(|| self.strategy_kind.create());
        Some(candidates[strategy.select(&refs)])
    }

    fn upsert(
        &mut self,
        node_id: &str,
        service: &str,
        group: String,
        local: bool,
        handler: Option<EventHandler>,
    ) {
        let endpoint = Arc::new(EventEndpoint {
            node_id: node_id.to_string(),
            service: service.to_string(),
            group,
            local,
            handler,
        });
        if let Some(pos) = self
            .endpoints
            .iter()
            .position(|ep| ep.node_id == node_id && ep.service == service)
        {
            self.endpoints[pos] = endpoint;
        } else {
            self.endpoints.push(endpoint);
        }
    }

    fn remove_service(&mut self, node_id: &str, service: &str) {
        self.endpoints
            .retain(|ep| !(ep.node_id == node_id && ep.service == service));
    }

    fn remove_node(&mut self, node_id: &str) {
        self.endpoints.retain(|ep| ep.node_id != node_id);
    }

    fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl std::fmt::Debug for EventEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEntry")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .field("strategy", &self.strategy_kind)
            .finish_non_exhaustive()
    }
}

/// Event entries by event name.
#[derive(Debug)]
pub struct EventCatalog {
    entries: HashMap<String, EventEntry>,
    strategy_kind: StrategyKind,
}

impl EventCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new(strategy_kind: StrategyKind) -> Self {
        Self {
            entries: HashMap::new(),
            strategy_kind,
        }
    }

    /// Looks up an event entry.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<&EventEntry> {
        self.entries.get(event)
    }

    /// Inserts or updates one (service, node) subscription.
    ///
    /// The group defaults to the service's full name when the descriptor
    /// does not name one.
    pub fn upsert(
        &mut self,
        event: &str,
        node_id: &str,
        service: &str,
        group: Option<String>,
        local: bool,
        handler: Option<EventHandler>,
    ) {
        let group = group.unwrap_or_else(|| service.to_string());
        let entry = self
            .entries
            .entry(event.to_string())
            .or_insert_with(|| EventEntry::new(event.to_string(), self.strategy_kind));
        entry.upsert(node_id, service, group, local, handler);
    }

    /// Removes one service's subscription to one event.
    pub fn remove_service(&mut self, event: &str, node_id: &str, service: &str) {
        if let Some(entry) = self.entries.get_mut(event) {
            entry.remove_service(node_id, service);
            if entry.is_empty() {
                self.entries.remove(event);
            }
        }
    }

    /// Removes every subscription of a node.
    pub fn remove_node(&mut self, node_id: &str) {
        self.entries.retain(|_, entry| {
            entry.remove_node(node_id);
            !entry.is_empty()
        });
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &EventEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> EventCatalog {
        EventCatalog::new(StrategyKind::RoundRobin)
    }

    #[test]
    fn test_one_subscription_per_service_and_node() {
        let mut catalog = catalog();
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.upsert("user.created", "node-b", "mailer", None, false, None);
        catalog.upsert("user.created", "node-a", "audit", None, false, None);
        assert_eq!(catalog.get("user.created").unwrap().endpoints().len(), 3);
    }

    #[test]
    fn test_group_defaults_to_service_name() {
        let mut catalog = catalog();
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.upsert(
            "user.created",
            "node-a",
            "audit",
            Some("compliance".to_string()),
            false,
            None,
        );
        let entry = catalog.get("user.created").unwrap();
        let groups: Vec<&str> = entry.endpoints().iter().map(|ep| ep.group.as_str()).collect();
        assert!(groups.contains(&"mailer"));
        assert!(groups.contains(&"compliance"));
    }

    #[test]
    fn test_remove_service_drops_empty_entry() {
        let mut catalog = catalog();
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.remove_service("user.created", "node-a", "mailer");
        assert!(catalog.get("user.created").is_none());
    }

    #[test]
    fn test_balance_rotates_within_a_group() {
        let mut catalog = catalog();
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.upsert("user.created", "node-b", "mailer", None, false, None);
        let entry = catalog.get("user.created").unwrap();
        let candidates: Vec<&Arc<EventEndpoint>> = entry.endpoints().iter().collect();

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2 {
            seen.insert(entry.balance("mailer", &candidates).unwrap().node_id.clone());
        }
        assert_eq!(seen.len(), 2, "round-robin must alternate group members");
        assert!(entry.balance("mailer", &[]).is_none());
    }

    #[test]
    fn test_group_cursors_are_independent() {
        let mut catalog = catalog();
        catalog.upsert("user.created", "node-a", "mailer", None, false, None);
        catalog.upsert("user.created", "node-b", "mailer", None, false, None);
        catalog.upsert("user.created", "node-c", "audit", None, false, None);
        let entry = catalog.get("user.created").unwrap();
        let mailer: Vec<&Arc<EventEndpoint>> = entry
            .endpoints()
            .iter()
            .filter(|ep| ep.group == "mailer")
            .collect();
        let audit: Vec<&Arc<EventEndpoint>> = entry
            .endpoints()
            .iter()
            .filter(|ep| ep.group == "audit")
            .collect();

        // Interleave selections; the audit cursor must not disturb the
        // mailer rotation.
        let first = entry.balance("mailer", &mailer).unwrap().node_id.clone();
        entry.balance("audit", &audit).unwrap();
        let second = entry.balance("mailer", &mailer).unwrap().node_id.clone();
        assert_ne!(first, second);
    }
}

// Made with Bob
