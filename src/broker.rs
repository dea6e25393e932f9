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

//! The broker: lifecycle, service hosting, and call/event orchestration.
//!
//! A [`Broker`] hosts local services, tracks the cluster through its
//! registry, and routes every `call` to one endpoint: local via direct
//! invocation, remote via the transit. The broker is cheaply clonable;
//! clones share the same runtime.
//!
//! # Call flow
//!
//! 1. A child [`Context`] is derived from the parent (or a fresh root).
//! 2. The registry selects an endpoint (strategy + circuit filtering).
//! 3. The cacher is probed when the action's cache policy is set.
//! 4. The middleware chain runs around the local handler or the remote
//!    request.
//! 5. Retryable failures are retried against a different endpoint while
//!    budget remains; successes are written back to the cache.

use crate::cacher::{cache_key, Cacher};
use crate::config::BrokerConfig;
use crate::context::Context;
use crate::error::BrokerError;
use crate::internal::node_service;
use crate::middleware::{compose, Middleware, Next};
use crate::packet::{EventPayload, InfoPayload, RequestPayload};
use crate::registry::{ActionEndpoint, Registry, SelectOptions};
use crate::serialization::{JsonSerializer, Serializer};
use crate::service::{ActionFuture, ServiceDescriptor};
use crate::transit::Transit;
use crate::transport::Transporter;
use crate::validator::{SchemaValidator, Validator};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STATE_CREATED: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_STARTED: u8 = 2;
const STATE_STOPPING: u8 = 3;
const STATE_STOPPED: u8 = 4;

/// Options for a single [`Broker::call`].
///
/// # Examples
///
/// ```rust
/// use swarmbus::CallOptions;
/// use std::time::Duration;
///
/// let opts = CallOptions::default()
///     .with_timeout(Duration::from_millis(200))
///     .with_retries(2)
///     .with_node_id("node-b");
/// ```
#[derive(Clone, Default)]
pub struct CallOptions {
    pub(crate) parent: Option<Context>,
    pub(crate) node_id: Option<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: Option<u32>,
}

impl CallOptions {
    /// Makes the call a child of an existing context.
    #[must_use]
    pub fn with_parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Pins the call to one node.
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Overrides the configured request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the configured retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }
}

impl std::fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallOptions")
            .field("node_id", &self.node_id)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

struct BrokerInner {
    config: Arc<BrokerConfig>,
    registry: Registry,
    transit: Option<Arc<Transit>>,
    cacher: Option<Arc<dyn Cacher>>,
    validator: Arc<dyn Validator>,
    middleware: Vec<Arc<dyn Middleware>>,
    services: Mutex<Vec<ServiceDescriptor>>,
    state: AtomicU8,
    started_at: Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A process-embedded microservices broker.
///
/// Built with [`Broker::builder`]. Cloning is cheap and clones share the
/// runtime, so handlers, middleware, and background tasks all hold plain
/// `Broker` values.
///
/// # Examples
///
/// ```rust,no_run
/// use serde_json::json;
/// use swarmbus::{Broker, BrokerConfig, CallOptions, ServiceDescriptor};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = Broker::builder(BrokerConfig::default())
///     .service(
///         ServiceDescriptor::build("math")
///             .action("add", |ctx| async move {
///                 let a = ctx.params()["a"].as_i64().unwrap_or(0);
///                 let b = ctx.params()["b"].as_i64().unwrap_or(0);
///                 Ok(json!(a + b))
///             })
///             .finish(),
///     )
///     .build();
///
/// broker.start().await?;
/// let sum = broker
///     .call("math.add", json!({ "a": 2, "b": 3 }), CallOptions::default())
///     .await?;
/// assert_eq!(sum, json!(5));
/// broker.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

/// Configures and assembles a [`Broker`].
///
/// All pluggables have working defaults: no transporter (local-only
/// broker), JSON serializer, no cacher, the built-in schema validator,
/// and an empty middleware chain.
pub struct BrokerBuilder {
    config: BrokerConfig,
    transporter: Option<Arc<dyn Transporter>>,
    serializer: Arc<dyn Serializer>,
    cacher: Option<Arc<dyn Cacher>>,
    validator: Arc<dyn Validator>,
    middleware: Vec<Arc<dyn Middleware>>,
    services: Vec<ServiceDescriptor>,
}

impl BrokerBuilder {
    fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            transporter: None,
            serializer: Arc::new(JsonSerializer::default()),
            cacher: None,
            validator: Arc::new(SchemaValidator),
            middleware: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Attaches a transporter, making this broker a cluster peer.
    ///
    /// Without one the broker is local-only: remote discovery, calls,
    /// and event deliveries are disabled.
    #[must_use]
    pub fn transporter(mut self, transporter: Arc<dyn Transporter>) -> Self {
        self.transporter = Some(transporter);
        self
    }

    /// Replaces the packet serializer (JSON by default).
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Attaches a result cacher.
    #[must_use]
    pub fn cacher(mut self, cacher: Arc<dyn Cacher>) -> Self {
        self.cacher = Some(cacher);
        self
    }

    /// Replaces the parameter validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    /// Appends a middleware layer; the first appended is outermost.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Registers a service at build time.
    #[must_use]
    pub fn service(mut self, service: ServiceDescriptor) -> Self {
        self.services.push(service);
        self
    }

    /// Assembles the broker and registers the build-time services.
    ///
    /// # Panics
    ///
    /// Panics when a service carries a malformed parameter schema; a bad
    /// schema is a programming error surfaced at assembly, not at call
    /// time.
    #[must_use]
    pub fn build(self) -> Broker {
        let config = Arc::new(self.config);
        let registry = Registry::new(Arc::clone(&config));
        let transit = self.transporter.map(|transporter| {
            Arc::new(Transit::new(
                Arc::clone(&config),
                transporter,
                Arc::clone(&self.serializer),
            ))
        });
        let broker = Broker {
            inner: Arc::new(BrokerInner {
                config,
                registry,
                transit,
                cacher: self.cacher,
                validator: self.validator,
                middleware: self.middleware,
                services: Mutex::new(Vec::new()),
                state: AtomicU8::new(STATE_CREATED),
                started_at: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };
        for service in self.services {
            broker
                .register_service(service)
                .expect("invalid service definition");
        }
        broker
    }
}

impl Broker {
    /// Starts building a broker with the given configuration.
    #[must_use]
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    /// The broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// The local node id.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    /// Seconds since [`start`](Self::start) completed.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.inner
            .started_at
            .lock()
            .unwrap()
            .map_or(0, |at| at.elapsed().as_secs())
    }

    /// Whether the broker is started and not stopping.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_STARTED
    }

    /// Number of requests awaiting remote responses.
    pub async fn pending_requests(&self) -> usize {
        match &self.inner.transit {
            Some(transit) => transit.pending_count().await,
            None => 0,
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Registers a service on this broker.
    ///
    /// Parameter schemas are compiled once here; the `created` hook runs
    /// immediately. When the broker is already started, the updated
    /// service snapshot is announced to the cluster.
    ///
    /// # Errors
    ///
    /// Fails when the broker is stopping or a parameter schema does not
    /// compile.
    pub fn register_service(&self, mut service: ServiceDescriptor) -> Result<(), BrokerError> {
        if self.inner.state.load(Ordering::SeqCst) >= STATE_STOPPING {
            return Err(BrokerError::BrokerStopping);
        }
        for action in service.actions.values_mut() {
            if let Some(schema) = &action.params {
                action.compiled = Some(self.inner.validator.compile(schema)?);
            }
        }
        self.inner.registry.register_local_service(&service);
        if let Some(created) = &service.created {
            created(self);
        }
        let announce = self.is_started();
        self.inner.services.lock().unwrap().push(service);
        if announce {
            let broker = self.clone();
            tokio::spawn(async move {
                if let Err(err) = broker.publish_local_info(None).await {
                    warn!(error = %err, "failed to announce service registration");
                }
            });
        }
        Ok(())
    }

    /// Registers a service, announcing it to the cluster when started.
    ///
    /// Async convenience over [`register_service`](Self::register_service)
    /// for use inside handlers.
    ///
    /// # Errors
    ///
    /// Same as [`register_service`](Self::register_service).
    pub async fn create_service(&self, service: ServiceDescriptor) -> Result<(), BrokerError> {
        self.register_service(service)
    }

    /// Destroys a locally hosted service.
    ///
    /// Runs the service's `stopped` hook, removes its actions and
    /// subscriptions from the registry, and announces the shrunken
    /// snapshot to the cluster. Peers drop the service through the
    /// ordinary INFO reconcile.
    ///
    /// # Errors
    ///
    /// Fails when no such local service exists.
    pub async fn destroy_service(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<(), BrokerError> {
        let descriptor = {
            let mut services = self.inner.services.lock().unwrap();
            let idx = services
                .iter()
                .position(|s| s.name == name && s.version == version)
                .ok_or_else(|| {
                    BrokerError::custom("ServiceNotRegistered", format!("no local service '{name}'"))
                })?;
            services.remove(idx)
        };
        if let Some(stopped) = &descriptor.stopped {
            if let Err(err) = stopped(self.clone()).await {
                warn!(service = %descriptor.full_name(), error = %err, "service stop hook failed");
            }
        }
        self.inner.registry.unregister_local_service(name, version);
        if self.is_started() {
            self.publish_local_info(None).await?;
        }
        Ok(())
    }

    /// Waits until every listed action has at least one endpoint.
    ///
    /// Useful after start when remote peers are still announcing
    /// themselves.
    ///
    /// # Errors
    ///
    /// [`BrokerError::RequestTimeout`] when the actions do not all
    /// appear within `timeout`.
    pub async fn wait_for_actions(
        &self,
        actions: &[&str],
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = actions.iter().all(|action| {
                self.inner
                    .registry
                    .get_action_endpoints(action)
                    .is_some_and(|endpoints| !endpoints.is_empty())
            });
            if ready {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrokerError::RequestTimeout {
                    action: actions.join(","),
                    node_id: None,
                    elapsed: timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Starts the broker.
    ///
    /// Registers the internal `$node` service, connects the transit
    /// (subscriptions, discovery broadcast, INFO announcement), runs
    /// `started` hooks in registration order, and spawns the heartbeat
    /// and liveness loops.
    ///
    /// # Errors
    ///
    /// Fails when the broker was already started, the transport cannot
    /// connect, or a `started` hook fails.
    pub async fn start(&self) -> Result<(), BrokerError> {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_CREATED,
                STATE_STARTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(BrokerError::custom(
                "IllegalState",
                "broker was already started",
            ));
        }

        if self.inner.config.internal_services {
            self.register_service(node_service())?;
        }

        if let Some(transit) = &self.inner.transit {
            let receive_loop = transit.connect(self.clone()).await?;
            self.inner.tasks.lock().unwrap().push(receive_loop);
        }

        let started_hooks: Vec<_> = {
            let services = self.inner.services.lock().unwrap();
            services.iter().filter_map(|s| s.started.clone()).collect()
        };
        for hook in started_hooks {
            hook(self.clone()).await?;
        }

        *self.inner.started_at.lock().unwrap() = Some(Instant::now());
        self.inner.state.store(STATE_STARTED, Ordering::SeqCst);

        if let Some(transit) = &self.inner.transit {
            transit.discover().await?;
            self.publish_local_info(None).await?;
            self.spawn_heartbeat_loop(Arc::clone(transit));
            self.spawn_liveness_loop();
        }

        info!(node = %self.node_id(), "broker started");
        Ok(())
    }

    /// Stops the broker.
    ///
    /// Runs `stopped` hooks in reverse registration order, publishes a
    /// DISCONNECT, rejects all pending requests with `BROKER_STOPPING`,
    /// and tears down the transport and background loops.
    ///
    /// # Errors
    ///
    /// Fails when the transport teardown fails; hooks and pending
    /// rejection run regardless.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_STARTED,
                STATE_STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }

        let stopped_hooks: Vec<_> = {
            let services = self.inner.services.lock().unwrap();
            services
                .iter()
                .rev()
                .filter_map(|s| s.stopped.clone())
                .collect()
        };
        for hook in stopped_hooks {
            if let Err(err) = hook(self.clone()).await {
                warn!(error = %err, "service stop hook failed");
            }
        }

        let mut teardown = Ok(());
        if let Some(transit) = &self.inner.transit {
            teardown = transit.disconnect().await;
        }
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        self.inner.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!(node = %self.node_id(), "broker stopped");
        teardown
    }

    /// Calls an action by logical name.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::ServiceNotFound`]: no node in the cluster hosts
    ///   the action.
    /// - [`BrokerError::ServiceNotAvailable`]: endpoints exist but none
    ///   is selectable right now.
    /// - [`BrokerError::RequestTimeout`]: no response within the
    ///   timeout (retried while budget remains).
    /// - [`BrokerError::ValidationFailed`]: params rejected by the
    ///   action's schema.
    /// - Whatever the handler itself returns.
    pub async fn call(
        &self,
        action: &str,
        params: Value,
        opts: CallOptions,
    ) -> Result<Value, BrokerError> {
        if self.inner.state.load(Ordering::SeqCst) >= STATE_STOPPING {
            return Err(BrokerError::BrokerStopping);
        }
        let timeout = opts.timeout.unwrap_or(self.inner.config.request_timeout);
        let retries = opts.retries.unwrap_or(self.inner.config.request_retry);
        let mut ctx = match &opts.parent {
            Some(parent) => Context::child_of(parent, Some(action.to_string()), params, timeout),
            None => Context::new_root(self.clone(), Some(action.to_string()), params, timeout),
        };

        let mut last_failed: Option<String> = None;
        let mut attempt: u32 = 0;
        loop {
            let select = SelectOptions {
                node_id: opts.node_id.as_deref(),
                prefer_local: self.inner.config.prefer_local,
                exclude_node: last_failed.as_deref(),
            };
            let endpoint = self.inner.registry.select_endpoint(action, &select)?;
            ctx.set_node_id(&endpoint.node_id);
            endpoint.record_request();
            debug!(
                action = %action,
                node = %endpoint.node_id,
                attempt,
                "dispatching call"
            );

            let cache_slot = match (&self.inner.cacher, endpoint.action.cache) {
                (Some(cacher), true) => Some((Arc::clone(cacher), cache_key(action, ctx.params()))),
                _ => None,
            };
            if let Some((cacher, key)) = &cache_slot {
                if let Some(hit) = cacher.get(key).await {
                    ctx.mark_cached();
                    endpoint.record_success();
                    return Ok(hit);
                }
            }

            match self.dispatch(ctx.clone(), &endpoint).await {
                Ok(value) => {
                    endpoint.record_success();
                    if let Some((cacher, key)) = cache_slot {
                        cacher.set(&key, value.clone(), None).await;
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if err.counts_for_circuit() {
                        endpoint.record_failure();
                    }
                    if err.retryable() && attempt < retries {
                        attempt += 1;
                        ctx.bump_retry();
                        last_failed = Some(endpoint.node_id.clone());
                        debug!(action = %action, attempt, error = %err, "retrying call");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Runs the middleware chain around the endpoint-specific handler.
    async fn dispatch(
        &self,
        ctx: Context,
        endpoint: &Arc<ActionEndpoint>,
    ) -> Result<Value, BrokerError> {
        let base: Next = if endpoint.local {
            let endpoint = Arc::clone(endpoint);
            Arc::new(move |ctx| {
                let endpoint = Arc::clone(&endpoint);
                Box::pin(async move { invoke_local(&endpoint, ctx).await }) as ActionFuture
            })
        } else {
            let broker = self.clone();
            Arc::new(move |ctx| {
                let broker = broker.clone();
                Box::pin(async move { broker.remote_request(ctx).await }) as ActionFuture
            })
        };
        let chain = compose(&self.inner.middleware, base);
        chain(ctx).await
    }

    /// Sends the context's call to its selected remote node and awaits
    /// the response or the timeout.
    async fn remote_request(&self, ctx: Context) -> Result<Value, BrokerError> {
        let action = ctx.action().unwrap_or_default().to_string();
        let transit = self
            .inner
            .transit
            .as_ref()
            .ok_or_else(|| BrokerError::ServiceNotAvailable {
                action: action.clone(),
                node_id: ctx.node_id().map(str::to_string),
            })?;
        let timeout = ctx.timeout();
        let receiver = transit.send_request(&ctx).await?;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            // The sending half vanished: the pending table was torn down.
            Ok(Err(_)) => Err(BrokerError::BrokerStopping),
            Err(_) => {
                transit.pending.cancel(ctx.id()).await;
                Err(BrokerError::RequestTimeout {
                    action,
                    node_id: ctx.node_id().map(str::to_string),
                    elapsed: timeout,
                })
            }
        }
    }

    /// Executes an inbound REQUEST against the local endpoint.
    ///
    /// Runs the same middleware chain as caller-side dispatch; the
    /// endpoint's circuit counters are caller-side state and are not
    /// touched here.
    pub(crate) async fn invoke_incoming_request(
        &self,
        payload: RequestPayload,
    ) -> Result<Value, BrokerError> {
        let Some(endpoint) = self.inner.registry.get_local_endpoint(&payload.action) else {
            return Err(BrokerError::ServiceNotFound {
                action: payload.action.clone(),
            });
        };
        let ctx = Context::for_incoming_request(self.clone(), &payload);
        let endpoint_for_chain = Arc::clone(&endpoint);
        let base: Next = Arc::new(move |ctx| {
            let endpoint = Arc::clone(&endpoint_for_chain);
            Box::pin(async move { invoke_local(&endpoint, ctx).await }) as ActionFuture
        });
        let chain = compose(&self.inner.middleware, base);
        chain(ctx).await
    }

    /// Emits a group-balanced event: one delivery per consumer group.
    ///
    /// # Errors
    ///
    /// Fails when a remote delivery cannot be published; local handlers
    /// are awaited and cannot fail.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), BrokerError> {
        self.emit_from(event, data, None, None).await
    }

    /// Emits restricted to the given consumer groups.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub async fn emit_grouped(
        &self,
        event: &str,
        data: Value,
        groups: Vec<String>,
    ) -> Result<(), BrokerError> {
        self.emit_from(event, data, None, Some(groups)).await
    }

    pub(crate) async fn emit_from(
        &self,
        event: &str,
        data: Value,
        parent: Option<&Context>,
        groups: Option<Vec<String>>,
    ) -> Result<(), BrokerError> {
        let plan = self.inner.registry.emit_plan(event, groups.as_deref());
        debug!(
            event = %event,
            local = plan.local.len(),
            remote = plan.remote.len(),
            "emitting event"
        );
        if let Some(transit) = &self.inner.transit {
            for (node, node_groups) in &plan.remote {
                transit
                    .send_event(
                        node,
                        event,
                        data.clone(),
                        Some(node_groups.iter().cloned().collect()),
                        false,
                    )
                    .await?;
            }
        }
        for endpoint in &plan.local {
            if let Some(handler) = &endpoint.handler {
                let ctx = Context::for_event(self.clone(), event.to_string(), data.clone(), parent);
                handler(ctx).await;
            }
        }
        Ok(())
    }

    /// Broadcasts an event to every subscriber endpoint.
    ///
    /// # Errors
    ///
    /// Fails when a remote delivery cannot be published.
    pub async fn broadcast(&self, event: &str, data: Value) -> Result<(), BrokerError> {
        self.broadcast_from(event, data, None).await
    }

    pub(crate) async fn broadcast_from(
        &self,
        event: &str,
        data: Value,
        parent: Option<&Context>,
    ) -> Result<(), BrokerError> {
        let plan = self.inner.registry.broadcast_plan(event, None);
        if let Some(transit) = &self.inner.transit {
            for (node, node_groups) in &plan.remote {
                transit
                    .send_event(
                        node,
                        event,
                        data.clone(),
                        Some(node_groups.iter().cloned().collect()),
                        true,
                    )
                    .await?;
            }
        }
        for endpoint in &plan.local {
            if let Some(handler) = &endpoint.handler {
                let ctx = Context::for_event(self.clone(), event.to_string(), data.clone(), parent);
                handler(ctx).await;
            }
        }
        Ok(())
    }

    /// Delivers an event to local subscribers only, synchronously.
    pub async fn emit_local(&self, event: &str, data: Value) {
        let endpoints = self.inner.registry.local_event_endpoints(event, None);
        for endpoint in endpoints {
            if let Some(handler) = &endpoint.handler {
                let ctx = Context::for_event(self.clone(), event.to_string(), data.clone(), None);
                handler(ctx).await;
            }
        }
    }

    /// Measures round-trip time to a peer.
    ///
    /// # Errors
    ///
    /// Fails when the broker has no transporter or the peer does not
    /// answer within the request timeout.
    pub async fn ping(&self, node_id: &str) -> Result<Duration, BrokerError> {
        let transit = self
            .inner
            .transit
            .as_ref()
            .ok_or(BrokerError::Transport(
                crate::transport::TransportError::NotConnected,
            ))?;
        transit.ping(node_id, self.inner.config.request_timeout).await
    }

    /// Dispatches an inbound EVENT packet to local subscribers.
    ///
    /// Broadcast packets reach every matching local subscriber; balanced
    /// packets reach one subscriber per listed group.
    pub(crate) async fn dispatch_incoming_event(&self, payload: EventPayload) {
        let endpoints = if payload.broadcast {
            self.inner
                .registry
                .local_event_endpoints(&payload.event, payload.groups.as_deref())
        } else {
            self.inner
                .registry
                .balance_local_event_endpoints(&payload.event, payload.groups.as_deref())
        };
        for endpoint in endpoints {
            if let Some(handler) = &endpoint.handler {
                let ctx = Context::for_event(
                    self.clone(),
                    payload.event.clone(),
                    payload.data.clone(),
                    None,
                );
                handler(ctx).await;
            }
        }
    }

    /// Applies an inbound INFO packet and emits the membership events.
    ///
    /// The registry update runs inline so INFO packets from one node are
    /// reconciled in arrival order; the local event fan-out is spawned so
    /// a slow subscriber cannot stall the packet pump.
    pub(crate) async fn handle_info(&self, payload: InfoPayload) {
        let sender = payload.sender.clone();
        let outcome = self.inner.registry.process_info(&payload);
        let broker = self.clone();
        tokio::spawn(async move {
            if outcome.new_node || outcome.reconnected {
                broker
                    .emit_local(
                        "$node.connected",
                        json!({ "node": sender, "reconnected": outcome.reconnected }),
                    )
                    .await;
            } else {
                broker
                    .emit_local("$node.updated", json!({ "node": sender }))
                    .await;
            }
        });
    }

    /// Handles a node departure (graceful or detected) with the full
    /// cascade: registry unregistration, pending-slot rejection, local
    /// event.
    pub(crate) async fn handle_node_disconnected(&self, node_id: &str, unexpected: bool) {
        if !self.inner.registry.node_disconnected(node_id, unexpected) {
            return;
        }
        if let Some(transit) = &self.inner.transit {
            transit.pending.reject_node(node_id).await;
        }
        let broker = self.clone();
        let node_id = node_id.to_string();
        tokio::spawn(async move {
            broker
                .emit_local(
                    "$node.disconnected",
                    json!({ "node": node_id, "unexpected": unexpected }),
                )
                .await;
        });
    }

    /// Publishes the local INFO snapshot (broadcast, or targeted at one
    /// node as a DISCOVER answer).
    pub(crate) async fn publish_local_info(&self, target: Option<&str>) -> Result<(), BrokerError> {
        let Some(transit) = &self.inner.transit else {
            return Ok(());
        };
        let payload = self.inner.registry.local_info(self.uptime_secs());
        transit.publish_info(payload, target).await
    }

    fn spawn_heartbeat_loop(&self, transit: Arc<Transit>) {
        let interval = self.inner.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(err) = transit.send_heartbeat(None).await {
                    warn!(error = %err, "failed to send heartbeat");
                }
            }
        });
        self.inner.tasks.lock().unwrap().push(handle);
    }

    fn spawn_liveness_loop(&self) {
        let broker = self.clone();
        let interval = self.inner.config.heartbeat_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = broker.inner.registry.expire_nodes();
                for node_id in expired {
                    warn!(node = %node_id, "heartbeat timeout, marking node disconnected");
                    if let Some(transit) = &broker.inner.transit {
                        transit.pending.reject_node(&node_id).await;
                    }
                    broker
                        .emit_local(
                            "$node.disconnected",
                            json!({ "node": node_id, "unexpected": true }),
                        )
                        .await;
                }
            }
        });
        self.inner.tasks.lock().unwrap().push(handle);
    }
}

/// Validates params against the action's compiled schema, then runs the
/// handler.
async fn invoke_local(
    endpoint: &Arc<ActionEndpoint>,
    ctx: Context,
) -> Result<Value, BrokerError> {
    if let Some(check) = &endpoint.action.compiled {
        if let Err(issues) = check.check(ctx.params()) {
            return Err(BrokerError::ValidationFailed {
                action: endpoint.action.name.clone(),
                issues,
            });
        }
    }
    let handler = endpoint
        .action
        .handler
        .clone()
        .ok_or_else(|| BrokerError::ServiceNotAvailable {
            action: endpoint.action.name.clone(),
            node_id: Some(endpoint.node_id.clone()),
        })?;
    handler(ctx).await
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("node_id", &self.node_id())
            .field("state", &self.inner.state.load(Ordering::SeqCst))
            .field("has_transit", &self.inner.transit.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceDescriptor;
    use serde_json::json;

    fn math_service() -> ServiceDescriptor {
        ServiceDescriptor::build("math")
            .action("add", |ctx| async move {
                let a = ctx.params()["a"].as_i64().unwrap_or(0);
                let b = ctx.params()["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            })
            .finish()
    }

    #[tokio::test]
    async fn test_local_call_without_transport() {
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(math_service())
            .build();
        broker.start().await.unwrap();

        let result = broker
            .call("math.add", json!({ "a": 2, "b": 3 }), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!(5));

        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_action_fails_not_found() {
        let broker = Broker::builder(BrokerConfig::new("solo")).build();
        broker.start().await.unwrap();
        let err = broker
            .call("ghost.action", Value::Null, CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SERVICE_NOT_FOUND");
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let broker = Broker::builder(BrokerConfig::new("solo")).build();
        broker.start().await.unwrap();
        assert!(broker.start().await.is_err());
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_after_stop_fails_stopping() {
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(math_service())
            .build();
        broker.start().await.unwrap();
        broker.stop().await.unwrap();
        let err = broker
            .call("math.add", json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BROKER_STOPPING");
    }

    #[tokio::test]
    async fn test_internal_node_actions_are_registered() {
        let broker = Broker::builder(BrokerConfig::new("solo")).build();
        broker.start().await.unwrap();
        let nodes = broker
            .call("$node.list", Value::Null, CallOptions::default())
            .await
            .unwrap();
        let rows = nodes.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "solo");
        assert_eq!(rows[0]["local"], true);
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_params() {
        let service = ServiceDescriptor::build("math")
            .action_with(
                "add",
                crate::service::ActionOptions::new()
                    .params(json!({ "a": "number", "b": "number" })),
                |ctx| async move {
                    let a = ctx.params()["a"].as_i64().unwrap_or(0);
                    let b = ctx.params()["b"].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                },
            )
            .finish();
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(service)
            .build();
        broker.start().await.unwrap();

        let err = broker
            .call("math.add", json!({ "a": "two" }), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION_ERROR");

        let ok = broker
            .call("math.add", json!({ "a": 2, "b": 3 }), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(ok, json!(5));
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cached_action_serves_from_cache() {
        use crate::cacher::MemoryCacher;
        use std::sync::atomic::AtomicU32;

        let hits = Arc::new(AtomicU32::new(0));
        let hits_in_handler = Arc::clone(&hits);
        let service = ServiceDescriptor::build("math")
            .action_with(
                "slow",
                crate::service::ActionOptions::new().cache(true),
                move |_ctx| {
                    let hits = Arc::clone(&hits_in_handler);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(42))
                    }
                },
            )
            .finish();
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .cacher(Arc::new(MemoryCacher::default()))
            .service(service)
            .build();
        broker.start().await.unwrap();

        for _ in 0..3 {
            let result = broker
                .call("math.slow", json!({ "n": 1 }), CallOptions::default())
                .await
                .unwrap();
            assert_eq!(result, json!(42));
        }
        // Handler ran once; the rest were cache hits.
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Different params are a different fingerprint.
        broker
            .call("math.slow", json!({ "n": 2 }), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_middleware_wraps_local_calls() {
        use crate::middleware::Next;

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_in_mw = Arc::clone(&seen);
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .middleware(move |next: Next| -> Next {
                let seen = Arc::clone(&seen_in_mw);
                Arc::new(move |ctx: Context| {
                    let next = Arc::clone(&next);
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        seen.lock()
                            .unwrap()
                            .push(ctx.action().unwrap_or_default().to_string());
                        next(ctx).await
                    }) as ActionFuture
                })
            })
            .service(math_service())
            .build();
        broker.start().await.unwrap();

        broker
            .call("math.add", json!({ "a": 1, "b": 1 }), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["math.add".to_string()]);
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_local_reaches_subscriber() {
        use std::sync::atomic::AtomicU32;

        let received = Arc::new(AtomicU32::new(0));
        let received_in_handler = Arc::clone(&received);
        let service = ServiceDescriptor::build("listener")
            .on_event("thing.happened", move |_ctx| {
                let received = Arc::clone(&received_in_handler);
                async move {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            })
            .finish();
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(service)
            .build();
        broker.start().await.unwrap();

        broker.emit_local("thing.happened", json!({})).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_context_child_call_inherits_request_id() {
        let probe: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let probe_outer = Arc::clone(&probe);
        let probe_inner = Arc::clone(&probe);
        let service = ServiceDescriptor::build("chain")
            .action("outer", move |ctx| {
                let probe = Arc::clone(&probe_outer);
                async move {
                    probe
                        .lock()
                        .unwrap()
                        .push((ctx.request_id().to_string(), ctx.level()));
                    ctx.call("chain.inner", Value::Null).await
                }
            })
            .action("inner", move |ctx| {
                let probe = Arc::clone(&probe_inner);
                async move {
                    probe
                        .lock()
                        .unwrap()
                        .push((ctx.request_id().to_string(), ctx.level()));
                    Ok(json!("deep"))
                }
            })
            .finish();
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(service)
            .build();
        broker.start().await.unwrap();

        broker
            .call("chain.outer", Value::Null, CallOptions::default())
            .await
            .unwrap();
        let seen = probe.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, seen[1].0, "request id must be inherited");
        assert_eq!(seen[0].1 + 1, seen[1].1, "level must increment");
        broker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_run_in_order() {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let make_service = |name: &str, log: Arc<Mutex<Vec<String>>>| {
            let started_log = Arc::clone(&log);
            let stopped_log = log;
            let started_name = format!("start-{name}");
            let stopped_name = format!("stop-{name}");
            ServiceDescriptor::build(name)
                .on_started(move |_broker| {
                    let log = Arc::clone(&started_log);
                    let tag = started_name.clone();
                    async move {
                        log.lock().unwrap().push(tag);
                        Ok(())
                    }
                })
                .on_stopped(move |_broker| {
                    let log = Arc::clone(&stopped_log);
                    let tag = stopped_name.clone();
                    async move {
                        log.lock().unwrap().push(tag);
                        Ok(())
                    }
                })
                .finish()
        };
        let broker = Broker::builder(BrokerConfig::new("solo"))
            .service(make_service("a", Arc::clone(&log)))
            .service(make_service("b", Arc::clone(&log)))
            .build();
        broker.start().await.unwrap();
        broker.stop().await.unwrap();

        // Start hooks in registration order, stop hooks reversed.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start-a", "start-b", "stop-b", "stop-a"]
        );
    }
}
