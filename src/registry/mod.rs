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

//! The in-memory catalog of nodes, services, actions, and events.
//!
//! The registry answers "who can serve action X right now?". It owns four
//! catalogs behind one `RwLock`: mutations (INFO reconcile, heartbeats,
//! disconnects, local registration) are serialized through the writer
//! path; endpoint selection and listings take the read path and run
//! concurrently.
//!
//! INFO packets always carry a node's full service snapshot. The
//! reconcile diffs that snapshot against stored state: new services are
//! added, changed services updated, and anything the snapshot no longer
//! mentions is removed together with its actions and subscriptions. The
//! same cascade runs, for every service of the node at once, when a node
//! disconnects.

mod action_catalog;
mod endpoint;
mod event_catalog;
mod node;
mod service_catalog;

pub use action_catalog::{ActionCatalog, ActionEntry};
pub use endpoint::{ActionEndpoint, EventEndpoint};
pub use event_catalog::{EventCatalog, EventEntry};
pub use node::{Node, NodeCatalog};
pub use service_catalog::{ServiceCatalog, ServiceItem};

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::packet::{ClientInfo, HeartbeatPayload, InfoPayload, ServiceInfo, PROTOCOL_VERSION};
use crate::service::{ActionDescriptor, ServiceDescriptor};
use crate::strategy::EndpointRef;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// What an INFO packet did to the node catalog.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfoOutcome {
    /// The sender was previously unknown.
    pub new_node: bool,
    /// The sender was known but unavailable.
    pub reconnected: bool,
}

/// Options for [`Registry::select_endpoint`].
#[derive(Clone, Copy, Debug)]
pub struct SelectOptions<'a> {
    /// Pin the call to one node; fails if that endpoint is missing or
    /// unavailable.
    pub node_id: Option<&'a str>,
    /// Prefer a local endpoint over the strategy's pick.
    pub prefer_local: bool,
    /// Avoid this node if any alternative exists (retry path).
    pub exclude_node: Option<&'a str>,
}

impl Default for SelectOptions<'_> {
    fn default() -> Self {
        Self {
            node_id: None,
            prefer_local: true,
            exclude_node: None,
        }
    }
}

/// Filter for [`Registry::list_actions`] and
/// [`Registry::list_events`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ListOptions {
    /// Only entries with a local endpoint.
    pub only_local: bool,
    /// Hide internal entries (names starting with `$`).
    pub skip_internal: bool,
    /// Include per-endpoint detail in the projection.
    pub with_endpoints: bool,
}

/// Delivery plan computed for one emission.
///
/// The subscriber set is snapshotted when the plan is built; reconciles
/// that land afterward do not affect in-flight deliveries.
#[derive(Debug, Default)]
pub struct EmitPlan {
    /// Local subscribers to invoke.
    pub local: Vec<Arc<EventEndpoint>>,
    /// Remote deliveries: target node to the groups it must serve.
    pub remote: BTreeMap<String, BTreeSet<String>>,
}

struct RegistryInner {
    nodes: NodeCatalog,
    services: ServiceCatalog,
    actions: ActionCatalog,
    events: EventCatalog,
    /// Wire forms of locally hosted services, for INFO assembly.
    local_infos: Vec<ServiceInfo>,
}

/// The broker's view of the cluster.
pub struct Registry {
    config: Arc<BrokerConfig>,
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Creates a registry containing only the local node.
    #[must_use]
    pub fn new(config: Arc<BrokerConfig>) -> Self {
        let mut nodes = NodeCatalog::new();
        nodes.insert(Node::new_local(
            config.node_id.clone(),
            json!({ "namespace": config.namespace }),
        ));
        Self {
            inner: RwLock::new(RegistryInner {
                nodes,
                services: ServiceCatalog::new(),
                actions: ActionCatalog::new(config.strategy),
                events: EventCatalog::new(config.strategy),
                local_infos: Vec::new(),
            }),
            config,
        }
    }

    /// The local node id.
    #[must_use]
    pub fn local_node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Registers a locally hosted service: catalog item, action
    /// endpoints (with handlers), and event subscriptions.
    pub fn register_local_service(&self, service: &ServiceDescriptor) {
        let mut inner = self.inner.write().unwrap();
        let node_id = self.config.node_id.clone();
        let full_name = service.full_name();

        let item = ServiceItem {
            name: service.name.clone(),
            version: service.version,
            full_name: full_name.clone(),
            node_id: node_id.clone(),
            settings: service.settings.clone(),
            local: true,
            action_names: service.actions.keys().cloned().collect(),
            event_names: service.events.keys().cloned().collect(),
        };
        if let Some(existing) =
            inner
                .services
                .find_mut(&service.name, service.version, &node_id)
        {
            *existing = item;
        } else {
            inner.services.insert(item);
        }

        for action in service.actions.values() {
            inner.actions.upsert(
                action.clone(),
                &node_id,
                &full_name,
                true,
                &self.config.circuit_breaker,
            );
        }
        for event in service.events.values() {
            inner.events.upsert(
                &event.name,
                &node_id,
                &full_name,
                event.group.clone(),
                true,
                event.handler.clone(),
            );
        }

        let wire = service.to_service_info();
        if let Some(existing) = inner
            .local_infos
            .iter_mut()
            .find(|info| info.full_name == wire.full_name)
        {
            *existing = wire;
        } else {
            inner.local_infos.push(wire);
        }
        debug!(service = %full_name, "registered local service");
    }

    /// Removes a locally hosted service and everything it contributed.
    ///
    /// Returns `false` when no such local service exists.
    pub fn unregister_local_service(&self, name: &str, version: Option<u32>) -> bool {
        let mut inner = self.inner.write().unwrap();
        let node_id = self.config.node_id.clone();
        let Some(item) = inner.services.remove(name, version, &node_id) else {
            return false;
        };
        for action in &item.action_names {
            inner.actions.remove(action, &node_id);
        }
        for event in &item.event_names {
            inner.events.remove_service(event, &node_id, &item.full_name);
        }
        inner
            .local_infos
            .retain(|info| info.full_name != item.full_name);
        debug!(service = %item.full_name, "unregistered local service");
        true
    }

    /// Processes a peer's INFO snapshot: upserts the node and reconciles
    /// its service list.
    pub fn process_info(&self, payload: &InfoPayload) -> InfoOutcome {
        if payload.sender == self.config.node_id {
            return InfoOutcome::default();
        }
        let mut inner = self.inner.write().unwrap();
        let outcome = match inner.nodes.get_mut(&payload.sender) {
            Some(node) => InfoOutcome {
                new_node: false,
                reconnected: node.apply_info(payload),
            },
            None => {
                inner.nodes.insert(Node::from_info(payload));
                InfoOutcome {
                    new_node: true,
                    reconnected: false,
                }
            }
        };
        Self::reconcile_node_services(
            &mut inner,
            &payload.sender,
            &payload.services,
            &self.config.circuit_breaker,
        );
        if outcome.new_node || outcome.reconnected {
            info!(node = %payload.sender, new = outcome.new_node, "node connected");
        }
        outcome
    }

    /// Processes a heartbeat.
    ///
    /// Returns `false` when the sender is unknown or tombstoned, in
    /// which case the caller should issue a targeted DISCOVER: a beat
    /// alone must not resurrect a node whose services were already torn
    /// down, but a fresh INFO may.
    pub fn heartbeat(&self, payload: &HeartbeatPayload) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.nodes.get_mut(&payload.sender) {
            Some(node) if node.available => {
                node.beat(payload.cpu);
                true
            }
            _ => false,
        }
    }

    /// Marks a node unavailable and cascades the unregistration of its
    /// services, actions, and subscriptions.
    ///
    /// Returns `true` when the node was available before (i.e. this call
    /// actually disconnected it).
    pub fn node_disconnected(&self, node_id: &str, unexpected: bool) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(node) = inner.nodes.get_mut(node_id) else {
            return false;
        };
        if node.local {
            return false;
        }
        let was_available = node.mark_unavailable();
        let removed = inner.services.remove_node(node_id);
        for item in &removed {
            for event in &item.event_names {
                inner.events.remove_service(event, node_id, &item.full_name);
            }
        }
        inner.actions.remove_node(node_id);
        if was_available {
            info!(node = %node_id, unexpected, "node disconnected");
        }
        was_available
    }

    /// Marks remote nodes with stale heartbeats disconnected.
    ///
    /// Returns the ids that transitioned, for `$node.disconnected`
    /// emission and pending-slot rejection.
    pub fn expire_nodes(&self) -> Vec<String> {
        let expired = {
            let inner = self.inner.read().unwrap();
            inner.nodes.expired(self.config.heartbeat_timeout)
        };
        expired
            .into_iter()
            .filter(|node_id| self.node_disconnected(node_id, true))
            .collect()
    }

    /// Selects one endpoint for an action call.
    ///
    /// # Errors
    ///
    /// [`BrokerError::ServiceNotFound`] when no entry exists for the
    /// action name; [`BrokerError::ServiceNotAvailable`] when the entry
    /// has no selectable endpoint (or a pinned node is missing or
    /// unavailable).
    pub fn select_endpoint(
        &self,
        action: &str,
        opts: &SelectOptions<'_>,
    ) -> Result<Arc<ActionEndpoint>, BrokerError> {
        let inner = self.inner.read().unwrap();
        let entry = inner
            .actions
            .get(action)
            .ok_or_else(|| BrokerError::ServiceNotFound {
                action: action.to_string(),
            })?;

        if let Some(pinned) = opts.node_id {
            let endpoint = entry.endpoint_for(pinned);
            return match endpoint {
                Some(ep) if inner.nodes.is_available(pinned) && ep.circuit.try_acquire() => {
                    Ok(Arc::clone(ep))
                }
                _ => Err(BrokerError::ServiceNotAvailable {
                    action: action.to_string(),
                    node_id: Some(pinned.to_string()),
                }),
            };
        }

        let mut candidates: Vec<Arc<ActionEndpoint>> = entry
            .endpoints()
            .iter()
            .filter(|ep| inner.nodes.is_available(&ep.node_id) && ep.circuit.selectable())
            .map(Arc::clone)
            .collect();

        // On retry the failed node is excluded, unless it is the only
        // endpoint left.
        if let Some(excluded) = opts.exclude_node {
            let kept: Vec<Arc<ActionEndpoint>> = candidates
                .iter()
                .filter(|ep| ep.node_id != excluded)
                .map(Arc::clone)
                .collect();
            if !kept.is_empty() {
                candidates = kept;
            }
        }

        if opts.prefer_local {
            if let Some(pos) = candidates.iter().position(|ep| ep.local) {
                let local = Arc::clone(&candidates[pos]);
                if local.circuit.try_acquire() {
                    return Ok(local);
                }
                candidates.remove(pos);
            }
        }

        while !candidates.is_empty() {
            let refs: Vec<EndpointRef<'_>> = candidates
                .iter()
                .map(|ep| EndpointRef {
                    node_id: &ep.node_id,
                    local: ep.local,
                })
                .collect();
            let idx = entry.strategy().select(&refs);
            let chosen = Arc::clone(&candidates[idx]);
            if chosen.circuit.try_acquire() {
                return Ok(chosen);
            }
            // Lost the race for a half-open probe; drop and re-balance.
            candidates.remove(idx);
        }

        Err(BrokerError::ServiceNotAvailable {
            action: action.to_string(),
            node_id: None,
        })
    }

    /// Returns all endpoints of an action, in catalog order.
    #[must_use]
    pub fn get_action_endpoints(&self, action: &str) -> Option<Vec<Arc<ActionEndpoint>>> {
        let inner = self.inner.read().unwrap();
        inner
            .actions
            .get(action)
            .map(|entry| entry.endpoints().to_vec())
    }

    /// Returns one node's endpoint for an action.
    #[must_use]
    pub fn get_endpoint_by_node_id(
        &self,
        action: &str,
        node_id: &str,
    ) -> Option<Arc<ActionEndpoint>> {
        let inner = self.inner.read().unwrap();
        inner
            .actions
            .get(action)
            .and_then(|entry| entry.endpoint_for(node_id).map(Arc::clone))
    }

    /// Returns the local endpoint for an action, if this node hosts one.
    #[must_use]
    pub fn get_local_endpoint(&self, action: &str) -> Option<Arc<ActionEndpoint>> {
        self.get_endpoint_by_node_id(action, &self.config.node_id)
    }

    /// Computes the group-balanced delivery plan for an emission.
    ///
    /// Within every consumer group (optionally restricted to `groups`),
    /// exactly one subscriber is chosen by the entry's strategy; chosen
    /// remote subscribers coalesce into one delivery per target node.
    #[must_use]
    pub fn emit_plan(&self, event: &str, groups: Option<&[String]>) -> EmitPlan {
        let inner = self.inner.read().unwrap();
        let mut plan = EmitPlan::default();
        let Some(entry) = inner.events.get(event) else {
            return plan;
        };

        let mut buckets: BTreeMap<&str, Vec<&Arc<EventEndpoint>>> = BTreeMap::new();
        for ep in entry.endpoints() {
            if !(ep.local || inner.nodes.is_available(&ep.node_id)) {
                continue;
            }
            if let Some(wanted) = groups {
                if !wanted.iter().any(|g| g == &ep.group) {
                    continue;
                }
            }
            buckets.entry(&ep.group).or_default().push(ep);
        }

        for (group, candidates) in buckets {
            if let Some(chosen) = entry.balance(group, &candidates) {
                if chosen.local {
                    plan.local.push(Arc::clone(chosen));
                } else {
                    plan.remote
                        .entry(chosen.node_id.clone())
                        .or_default()
                        .insert(group.to_string());
                }
            }
        }
        plan
    }

    /// Computes the broadcast delivery plan: every subscriber endpoint,
    /// one remote delivery per (service, node) pair coalesced per node.
    #[must_use]
    pub fn broadcast_plan(&self, event: &str, groups: Option<&[String]>) -> EmitPlan {
        let inner = self.inner.read().unwrap();
        let mut plan = EmitPlan::default();
        let Some(entry) = inner.events.get(event) else {
            return plan;
        };
        for ep in entry.endpoints() {
            if let Some(wanted) = groups {
                if !wanted.iter().any(|g| g == &ep.group) {
                    continue;
                }
            }
            if ep.local {
                plan.local.push(Arc::clone(ep));
            } else if inner.nodes.is_available(&ep.node_id) {
                plan.remote
                    .entry(ep.node_id.clone())
                    .or_default()
                    .insert(ep.group.clone());
            }
        }
        plan
    }

    /// Picks one local subscriber per consumer group, for inbound
    /// group-balanced EVENT packets.
    ///
    /// The emitting node chose this node per group; when several local
    /// services share an explicit group, the group's strategy picks the
    /// single receiver here.
    #[must_use]
    pub fn balance_local_event_endpoints(
        &self,
        event: &str,
        groups: Option<&[String]>,
    ) -> Vec<Arc<EventEndpoint>> {
        let inner = self.inner.read().unwrap();
        let Some(entry) = inner.events.get(event) else {
            return Vec::new();
        };
        let mut buckets: BTreeMap<&str, Vec<&Arc<EventEndpoint>>> = BTreeMap::new();
        for ep in entry.endpoints().iter().filter(|ep| ep.local) {
            if let Some(wanted) = groups {
                if !wanted.iter().any(|g| g == &ep.group) {
                    continue;
                }
            }
            buckets.entry(&ep.group).or_default().push(ep);
        }
        buckets
            .into_iter()
            .filter_map(|(group, candidates)| entry.balance(group, &candidates).map(Arc::clone))
            .collect()
    }

    /// Returns local subscribers of an event, optionally restricted to
    /// the given consumer groups (inbound broadcast EVENT dispatch and
    /// `emit_local`).
    #[must_use]
    pub fn local_event_endpoints(
        &self,
        event: &str,
        groups: Option<&[String]>,
    ) -> Vec<Arc<EventEndpoint>> {
        let inner = self.inner.read().unwrap();
        let Some(entry) = inner.events.get(event) else {
            return Vec::new();
        };
        entry
            .endpoints()
            .iter()
            .filter(|ep| ep.local)
            .filter(|ep| match groups {
                Some(wanted) => wanted.iter().any(|g| g == &ep.group),
                None => true,
            })
            .map(Arc::clone)
            .collect()
    }

    /// Assembles the local INFO payload.
    #[must_use]
    pub fn local_info(&self, uptime_secs: u64) -> InfoPayload {
        let inner = self.inner.read().unwrap();
        InfoPayload {
            ver: PROTOCOL_VERSION.to_string(),
            sender: self.config.node_id.clone(),
            services: inner.local_infos.clone(),
            ip_list: Vec::new(),
            client: ClientInfo::default(),
            config: json!({ "namespace": self.config.namespace }),
            uptime: uptime_secs,
        }
    }

    /// Whether a node is currently known and available.
    #[must_use]
    pub fn is_node_available(&self, node_id: &str) -> bool {
        self.inner.read().unwrap().nodes.is_available(node_id)
    }

    /// Projection of all known nodes, for `$node.list`.
    #[must_use]
    pub fn list_nodes(&self) -> Vec<Value> {
        let inner = self.inner.read().unwrap();
        let mut rows: Vec<Value> = inner
            .nodes
            .iter()
            .map(|node| {
                json!({
                    "id": node.id,
                    "available": node.available,
                    "local": node.local,
                    "cpu": node.cpu_usage,
                    "ipList": node.ip_list,
                    "client": node.client,
                    "uptime": node.uptime_secs,
                    "config": node.config,
                })
            })
            .collect();
        rows.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
        rows
    }

    /// Projection of all service instances, for `$node.services`.
    #[must_use]
    pub fn list_services(&self) -> Vec<Value> {
        let inner = self.inner.read().unwrap();
        let mut rows: Vec<Value> = inner
            .services
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "version": item.version,
                    "fullName": item.full_name,
                    "nodeID": item.node_id,
                    "local": item.local,
                    "settings": item.settings,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (a["fullName"].as_str(), a["nodeID"].as_str())
                .cmp(&(b["fullName"].as_str(), b["nodeID"].as_str()))
        });
        rows
    }

    /// Projection of action entries, for `$node.actions`.
    ///
    /// Internal actions (`$`-prefixed) are hidden behind
    /// `skip_internal`; protected actions are always hidden.
    #[must_use]
    pub fn list_actions(&self, opts: &ListOptions) -> Vec<Value> {
        let inner = self.inner.read().unwrap();
        let mut rows = Vec::new();
        for entry in inner.actions.iter() {
            if opts.skip_internal && entry.name.starts_with('$') {
                continue;
            }
            if entry.endpoints().iter().any(|ep| ep.action.protected) {
                continue;
            }
            if opts.only_local && !entry.endpoints().iter().any(|ep| ep.local) {
                continue;
            }
            let available = entry
                .endpoints()
                .iter()
                .filter(|ep| inner.nodes.is_available(&ep.node_id))
                .count();
            let mut row = json!({
                "name": entry.name,
                "count": entry.endpoints().len(),
                "available": available,
            });
            if opts.with_endpoints {
                row["endpoints"] = Value::Array(
                    entry
                        .endpoints()
                        .iter()
                        .map(|ep| {
                            json!({
                                "nodeID": ep.node_id,
                                "state": format!("{:?}", ep.state()),
                                "available": inner.nodes.is_available(&ep.node_id),
                            })
                        })
                        .collect(),
                );
            }
            rows.push(row);
        }
        rows.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        rows
    }

    /// Projection of event entries, for `$node.events`.
    #[must_use]
    pub fn list_events(&self, opts: &ListOptions) -> Vec<Value> {
        let inner = self.inner.read().unwrap();
        let mut rows = Vec::new();
        for entry in inner.events.iter() {
            if opts.skip_internal && entry.name.starts_with('$') {
                continue;
            }
            if opts.only_local && !entry.endpoints().iter().any(|ep| ep.local) {
                continue;
            }
            let mut row = json!({
                "name": entry.name,
                "groups": entry
                    .endpoints()
                    .iter()
                    .map(|ep| ep.group.clone())
                    .collect::<BTreeSet<String>>(),
            });
            if opts.with_endpoints {
                row["endpoints"] = Value::Array(
                    entry
                        .endpoints()
                        .iter()
                        .map(|ep| {
                            json!({
                                "nodeID": ep.node_id,
                                "service": ep.service,
                                "group": ep.group,
                            })
                        })
                        .collect(),
                );
            }
            rows.push(row);
        }
        rows.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        rows
    }

    /// Reconciles one node's stored services against a fresh snapshot.
    fn reconcile_node_services(
        inner: &mut RegistryInner,
        node_id: &str,
        services: &[ServiceInfo],
        circuit_config: &crate::config::CircuitBreakerConfig,
    ) {
        for service in services {
            let incoming_actions: BTreeSet<String> = service.actions.keys().cloned().collect();
            let incoming_events: BTreeSet<String> = service.events.keys().cloned().collect();

            match inner
                .services
                .find_mut(&service.name, service.version, node_id)
            {
                Some(item) => {
                    item.settings = service.settings.clone();
                    let dropped_actions: Vec<String> = item
                        .action_names
                        .difference(&incoming_actions)
                        .cloned()
                        .collect();
                    let dropped_events: Vec<String> = item
                        .event_names
                        .difference(&incoming_events)
                        .cloned()
                        .collect();
                    item.action_names = incoming_actions;
                    item.event_names = incoming_events;
                    let full_name = item.full_name.clone();
                    for action in dropped_actions {
                        inner.actions.remove(&action, node_id);
                    }
                    for event in dropped_events {
                        inner.events.remove_service(&event, node_id, &full_name);
                    }
                }
                None => inner.services.insert(ServiceItem {
                    name: service.name.clone(),
                    version: service.version,
                    full_name: service.full_name.clone(),
                    node_id: node_id.to_string(),
                    settings: service.settings.clone(),
                    local: false,
                    action_names: incoming_actions,
                    event_names: incoming_events,
                }),
            }

            for action_info in service.actions.values() {
                inner.actions.upsert(
                    ActionDescriptor::from_info(action_info),
                    node_id,
                    &service.full_name,
                    false,
                    circuit_config,
                );
            }
            for (event_name, event_info) in &service.events {
                inner.events.upsert(
                    event_name,
                    node_id,
                    &service.full_name,
                    event_info.group.clone(),
                    false,
                    None,
                );
            }
        }

        // Services the snapshot no longer mentions are gone: remove them
        // and everything they contributed.
        let stale: Vec<(String, Option<u32>)> = inner
            .services
            .of_node(node_id)
            .iter()
            .filter(|item| {
                !item.local
                    && !services
                        .iter()
                        .any(|svc| item.matches(&svc.name, svc.version))
            })
            .map(|item| (item.name.clone(), item.version))
            .collect();
        for (name, version) in stale {
            if let Some(item) = inner.services.remove(&name, version, node_id) {
                for action in &item.action_names {
                    inner.actions.remove(action, node_id);
                }
                for event in &item.event_names {
                    inner.events.remove_service(event, node_id, &item.full_name);
                }
                debug!(node = %node_id, service = %item.full_name, "service removed by reconcile");
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("node_id", &self.config.node_id)
            .finish_non_exhaustive()
    }
}
