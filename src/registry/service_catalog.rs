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

//! Services indexed by `(name, version, node)`.

use serde_json::Value;
use std::collections::BTreeSet;

/// One service instance on one node.
///
/// Two services are the same service iff `name` and `version` match; the
/// node id distinguishes instances. The item records which actions and
/// event subscriptions the instance contributed, so removal can cascade
/// precisely.
#[derive(Clone, Debug)]
pub struct ServiceItem {
    /// Service name without version prefix.
    pub name: String,
    /// Optional service version.
    pub version: Option<u32>,
    /// Versioned full name.
    pub full_name: String,
    /// Node hosting this instance.
    pub node_id: String,
    /// Opaque settings from the descriptor.
    pub settings: Value,
    /// Whether the instance is hosted locally.
    pub local: bool,
    /// Qualified action names contributed by this instance.
    pub action_names: BTreeSet<String>,
    /// Event names subscribed by this instance.
    pub event_names: BTreeSet<String>,
}

impl ServiceItem {
    /// Returns whether this item describes the same service (name and
    /// version) as the given key.
    #[must_use]
    pub fn matches(&self, name: &str, version: Option<u32>) -> bool {
        self.name == name && self.version == version
    }
}

/// All service instances known to this broker.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    items: Vec<ServiceItem>,
}

impl ServiceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a service instance by `(name, version, node)`.
    #[must_use]
    pub fn find(&self, name: &str, version: Option<u32>, node_id: &str) -> Option<&ServiceItem> {
        self.items
            .iter()
            .find(|item| item.matches(name, version) && item.node_id == node_id)
    }

    /// Finds a service instance mutably.
    pub fn find_mut(
        &mut self,
        name: &str,
        version: Option<u32>,
        node_id: &str,
    ) -> Option<&mut ServiceItem> {
        self.items
            .iter_mut()
            .find(|item| item.matches(name, version) && item.node_id == node_id)
    }

    /// Inserts a new instance.
    ///
    /// The caller is responsible for uniqueness; [`find`](Self::find)
    /// first, then insert.
    pub fn insert(&mut self, item: ServiceItem) {
        self.items.push(item);
    }

    /// Removes one instance, returning it for cascade cleanup.
    pub fn remove(
        &mut self,
        name: &str,
        version: Option<u32>,
        node_id: &str,
    ) -> Option<ServiceItem> {
        let idx = self
            .items
            .iter()
            .position(|item| item.matches(name, version) && item.node_id == node_id)?;
        Some(self.items.swap_remove(idx))
    }

    /// Removes every instance of a node, returning them for cascade
    /// cleanup.
    pub fn remove_node(&mut self, node_id: &str) -> Vec<ServiceItem> {
        let (removed, kept) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| item.node_id == node_id);
        self.items = kept;
        removed
    }

    /// Returns the instances hosted by a node.
    #[must_use]
    pub fn of_node(&self, node_id: &str) -> Vec<&ServiceItem> {
        self.items
            .iter()
            .filter(|item| item.node_id == node_id)
            .collect()
    }

    /// Iterates over every instance.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceItem> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, version: Option<u32>, node: &str) -> ServiceItem {
        ServiceItem {
            name: name.to_string(),
            version,
            full_name: match version {
                Some(v) => format!("v{v}.{name}"),
                None => name.to_string(),
            },
            node_id: node.to_string(),
            settings: Value::Null,
            local: false,
            action_names: BTreeSet::new(),
            event_names: BTreeSet::new(),
        }
    }

    #[test]
    fn test_identity_is_name_version_node() {
        let mut catalog = ServiceCatalog::new();
        catalog.insert(item("math", None, "node-a"));
        catalog.insert(item("math", None, "node-b"));
        catalog.insert(item("math", Some(2), "node-a"));

        assert!(catalog.find("math", None, "node-a").is_some());
        assert!(catalog.find("math", Some(2), "node-a").is_some());
        assert!(catalog.find("math", Some(3), "node-a").is_none());
    }

    #[test]
    fn test_remove_node_returns_all_instances() {
        let mut catalog = ServiceCatalog::new();
        catalog.insert(item("math", None, "node-a"));
        catalog.insert(item("users", None, "node-a"));
        catalog.insert(item("math", None, "node-b"));

        let removed = catalog.remove_node("node-a");
        assert_eq!(removed.len(), 2);
        assert!(catalog.find("math", None, "node-a").is_none());
        assert!(catalog.find("math", None, "node-b").is_some());
    }
}

// Made with Bob
