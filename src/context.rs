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

//! Per-call context propagated along the call graph.
//!
//! Every invocation, local or remote, action or event, materializes as a
//! [`Context`]. A root context starts a call tree; children created by
//! [`Context::call`] inherit the tree's `request_id` and `meta` and carry
//! their own `id`, params, and level. There is no ambient state: the
//! context is passed explicitly through middleware and handlers.
//!
//! `meta` is the one shared-mutable part: children reference the same map,
//! so a value written deep in the call graph is visible to the whole tree.

use crate::broker::{Broker, CallOptions};
use crate::error::BrokerError;
use crate::packet::RequestPayload;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Metadata map shared across a call tree.
pub type SharedMeta = Arc<Mutex<Map<String, Value>>>;

/// Per-call record.
///
/// Cheap to clone: params and meta are reference-counted or copy-on-write
/// at the JSON layer, and the broker handle is an `Arc`.
///
/// # Examples
///
/// Handlers receive a context and may fan out further calls through it:
///
/// ```rust,no_run
/// use serde_json::json;
/// use swarmbus::ServiceDescriptor;
///
/// let service = ServiceDescriptor::build("orders")
///     .action("create", |ctx| async move {
///         // Child call: inherits request id and meta, level + 1.
///         let user = ctx.call("users.get", json!({ "id": 7 })).await?;
///         Ok(json!({ "order": 1, "user": user }))
///     })
///     .finish();
/// ```
#[derive(Clone)]
pub struct Context {
    broker: Broker,
    id: String,
    request_id: String,
    parent_id: Option<String>,
    level: u32,
    action: Option<String>,
    event_name: Option<String>,
    params: Value,
    meta: SharedMeta,
    timeout: Duration,
    retry_count: u32,
    node_id: Option<String>,
    metrics: bool,
    cached_result: bool,
}

impl Context {
    /// Creates a root context for a fresh call tree.
    pub(crate) fn new_root(
        broker: Broker,
        action: Option<String>,
        params: Value,
        timeout: Duration,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            broker,
            request_id: id.clone(),
            id,
            parent_id: None,
            level: 1,
            action,
            event_name: None,
            params,
            meta: Arc::new(Mutex::new(Map::new())),
            timeout,
            retry_count: 0,
            node_id: None,
            metrics: false,
            cached_result: false,
        }
    }

    /// Creates a child context.
    ///
    /// The child inherits `request_id`, the shared `meta` map, and the
    /// metrics flag; it gets a fresh `id`, `parent_id` pointing at the
    /// parent, and `level + 1`.
    pub(crate) fn child_of(
        parent: &Context,
        action: Option<String>,
        params: Value,
        timeout: Duration,
    ) -> Self {
        Self {
            broker: parent.broker.clone(),
            id: Uuid::new_v4().to_string(),
            request_id: parent.request_id.clone(),
            parent_id: Some(parent.id.clone()),
            level: parent.level + 1,
            action,
            event_name: None,
            params,
            meta: Arc::clone(&parent.meta),
            timeout,
            retry_count: 0,
            node_id: None,
            metrics: parent.metrics,
            cached_result: false,
        }
    }

    /// Reconstructs the caller's context on the executing node.
    ///
    /// Ids, level, and meta come from the REQUEST payload, so the call
    /// tree stays coherent across node boundaries.
    pub(crate) fn for_incoming_request(broker: Broker, payload: &RequestPayload) -> Self {
        let meta = match &payload.meta {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        Self {
            broker,
            id: payload.id.clone(),
            request_id: payload.request_id.clone(),
            parent_id: payload.parent_id.clone(),
            level: payload.level,
            action: Some(payload.action.clone()),
            event_name: None,
            params: payload.params.clone(),
            meta: Arc::new(Mutex::new(meta)),
            timeout: Duration::from_millis(payload.timeout),
            retry_count: 0,
            node_id: None,
            metrics: payload.metrics,
            cached_result: false,
        }
    }

    /// Creates the context handed to an event subscriber.
    pub(crate) fn for_event(
        broker: Broker,
        event_name: String,
        data: Value,
        parent: Option<&Context>,
    ) -> Self {
        match parent {
            Some(parent) => {
                let mut ctx = Self::child_of(parent, None, data, parent.timeout);
                ctx.event_name = Some(event_name);
                ctx
            }
            None => {
                let timeout = broker.config().request_timeout;
                let mut ctx = Self::new_root(broker, None, data, timeout);
                ctx.event_name = Some(event_name);
                ctx
            }
        }
    }

    /// Unique id of this context.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id shared by the whole call tree (the root context's id).
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Id of the spawning context, `None` for a root.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Call-graph depth: 1 for a root, parent + 1 otherwise.
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Qualified action name, when this context carries an action call.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Event name, when this context carries an event delivery.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    /// Call parameters or event data.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Timeout budget for this call.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How many times this call has been retried.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Node id of the chosen executor, set once an endpoint is selected.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Whether metrics are enabled for this call tree.
    #[must_use]
    pub const fn metrics(&self) -> bool {
        self.metrics
    }

    /// Whether the result was served from the cache.
    #[must_use]
    pub const fn cached_result(&self) -> bool {
        self.cached_result
    }

    /// Returns the broker this context belongs to.
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Reads one key from the shared meta map.
    #[must_use]
    pub fn meta_get(&self, key: &str) -> Option<Value> {
        self.meta.lock().unwrap().get(key).cloned()
    }

    /// Writes one key into the shared meta map.
    ///
    /// The write is visible to every context in the call tree, parents
    /// included.
    pub fn meta_set(&self, key: impl Into<String>, value: Value) {
        self.meta.lock().unwrap().insert(key.into(), value);
    }

    /// Snapshots the meta map as a JSON value, for the wire.
    #[must_use]
    pub fn meta_snapshot(&self) -> Value {
        Value::Object(self.meta.lock().unwrap().clone())
    }

    pub(crate) fn set_node_id(&mut self, node_id: impl Into<String>) {
        self.node_id = Some(node_id.into());
    }

    pub(crate) fn mark_cached(&mut self) {
        self.cached_result = true;
    }

    pub(crate) fn bump_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Calls another action as a child of this context.
    ///
    /// # Errors
    ///
    /// Propagates the same errors as [`Broker::call`].
    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        self.broker
            .call(action, params, CallOptions::default().with_parent(self))
            .await
    }

    /// Emits a group-balanced event as a child of this context.
    ///
    /// # Errors
    ///
    /// Fails when a remote delivery cannot be published.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), BrokerError> {
        self.broker.emit_from(event, data, Some(self), None).await
    }

    /// Broadcasts an event to every subscriber as a child of this context.
    ///
    /// # Errors
    ///
    /// Fails when a remote delivery cannot be published.
    pub async fn broadcast(&self, event: &str, data: Value) -> Result<(), BrokerError> {
        self.broker.broadcast_from(event, data, Some(self)).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("request_id", &self.request_id)
            .field("parent_id", &self.parent_id)
            .field("level", &self.level)
            .field("action", &self.action)
            .field("event_name", &self.event_name)
            .field("node_id", &self.node_id)
            .field("retry_count", &self.retry_count)
            .field("cached_result", &self.cached_result)
            .finish_non_exhaustive()
    }
}


// Made with Bob
