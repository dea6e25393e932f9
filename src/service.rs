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

//! Service definitions.
//!
//! A service is a named, optionally versioned collection of actions and
//! event subscriptions, plus lifecycle hooks. User code builds a
//! [`ServiceDescriptor`] with the fluent builder and hands it to the
//! broker; the broker registers its actions and subscriptions in the
//! registry and announces them to the cluster in its INFO snapshot.
//!
//! Handlers are boxed async closures over [`Context`]. They never cross
//! the wire: remote nodes see only the wire form
//! ([`ServiceInfo`](crate::packet::ServiceInfo)) and invoke by name.

use crate::broker::Broker;
use crate::context::Context;
use crate::error::BrokerError;
use crate::packet::{ActionInfo, EventInfo, ServiceInfo};
use crate::validator::CompiledCheck;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by an action handler.
pub type ActionFuture = Pin<Box<dyn Future<Output = Result<Value, BrokerError>> + Send>>;

/// Boxed action handler.
pub type ActionHandler = Arc<dyn Fn(Context) -> ActionFuture + Send + Sync>;

/// Future returned by an event handler.
pub type EventFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Boxed event handler.
pub type EventHandler = Arc<dyn Fn(Context) -> EventFuture + Send + Sync>;

/// Future returned by `started`/`stopped` lifecycle hooks.
pub type LifecycleFuture = Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send>>;

/// Boxed async lifecycle hook (`started`, `stopped`).
pub type LifecycleHook = Arc<dyn Fn(Broker) -> LifecycleFuture + Send + Sync>;

/// Boxed synchronous `created` hook.
pub type CreatedHook = Arc<dyn Fn(&Broker) + Send + Sync>;

/// A single action of a service.
///
/// The descriptor is what the registry stores per endpoint. For local
/// endpoints it carries the handler and the schema checker compiled at
/// registration; for remote endpoints both are `None`.
#[derive(Clone)]
pub struct ActionDescriptor {
    /// Fully qualified name (`math.add`, `v2.math.add`).
    pub name: String,
    /// Whether results may be cached.
    pub cache: bool,
    /// Parameter schema, opaque to the broker core.
    pub params: Option<Value>,
    /// Protected actions are callable but hidden from listings.
    pub protected: bool,
    /// Handler, local endpoints only.
    pub handler: Option<ActionHandler>,
    /// Checker compiled from `params` at registration, local only.
    pub(crate) compiled: Option<Arc<dyn CompiledCheck>>,
}

impl ActionDescriptor {
    /// Returns the wire form announced in INFO packets.
    #[must_use]
    pub fn to_info(&self) -> ActionInfo {
        ActionInfo {
            name: self.name.clone(),
            cache: self.cache,
            params: self.params.clone(),
            protected: self.protected,
        }
    }

    /// Builds a handlerless descriptor from an announced wire form.
    #[must_use]
    pub fn from_info(info: &ActionInfo) -> Self {
        Self {
            name: info.name.clone(),
            cache: info.cache,
            params: info.params.clone(),
            protected: info.protected,
            handler: None,
            compiled: None,
        }
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("protected", &self.protected)
            .field("local", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// A single event subscription of a service.
#[derive(Clone)]
pub struct EventDescriptor {
    /// Event name subscribed to.
    pub name: String,
    /// Consumer group; `None` means the service name.
    pub group: Option<String>,
    /// Handler, local subscriptions only.
    pub handler: Option<EventHandler>,
}

impl EventDescriptor {
    /// Returns the wire form announced in INFO packets.
    #[must_use]
    pub fn to_info(&self) -> EventInfo {
        EventInfo {
            name: self.name.clone(),
            group: self.group.clone(),
        }
    }
}

impl fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("local", &self.handler.is_some())
            .finish()
    }
}

/// A complete service definition.
///
/// Built with [`ServiceDescriptor::build`] and registered on a broker via
/// [`BrokerBuilder::service`](crate::broker::BrokerBuilder::service) or
/// [`Broker::create_service`](crate::Broker::create_service).
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use swarmbus::{ActionOptions, ServiceDescriptor};
///
/// let service = ServiceDescriptor::build("math")
///     .action("add", |ctx| async move {
///         let a = ctx.params()["a"].as_i64().unwrap_or(0);
///         let b = ctx.params()["b"].as_i64().unwrap_or(0);
///         Ok(json!(a + b))
///     })
///     .action_with(
///         "div",
///         ActionOptions::new()
///             .cache(true)
///             .params(json!({ "a": "number", "b": "number" })),
///         |ctx| async move {
///             let a = ctx.params()["a"].as_f64().unwrap_or(0.0);
///             let b = ctx.params()["b"].as_f64().unwrap_or(1.0);
///             Ok(json!(a / b))
///         },
///     )
///     .on_event("cache.clear", |_ctx| async move {})
///     .finish();
///
/// assert_eq!(service.full_name(), "math");
/// assert!(service.actions.contains_key("math.add"));
/// ```
#[derive(Clone)]
pub struct ServiceDescriptor {
    /// Service name without version prefix.
    pub name: String,
    /// Optional version; versioned services are addressed as `v<N>.<name>`.
    pub version: Option<u32>,
    /// Opaque settings announced with the service.
    pub settings: Value,
    /// Actions by fully qualified name.
    pub actions: BTreeMap<String, ActionDescriptor>,
    /// Event subscriptions by event name.
    pub events: BTreeMap<String, EventDescriptor>,
    /// Hook run when the service is registered on a broker.
    pub created: Option<CreatedHook>,
    /// Hook run during broker start, in registration order.
    pub started: Option<LifecycleHook>,
    /// Hook run during broker stop, in reverse registration order.
    pub stopped: Option<LifecycleHook>,
}

impl ServiceDescriptor {
    /// Starts building a service with the given name.
    #[must_use]
    pub fn build(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(name)
    }

    /// Returns the versioned full name (`math`, `v2.math`).
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.version {
            Some(version) => format!("v{version}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Returns the wire form announced in INFO packets.
    #[must_use]
    pub fn to_service_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            version: self.version,
            full_name: self.full_name(),
            settings: self.settings.clone(),
            actions: self
                .actions
                .iter()
                .map(|(name, action)| (name.clone(), action.to_info()))
                .collect(),
            events: self
                .events
                .iter()
                .map(|(name, event)| (name.clone(), event.to_info()))
                .collect(),
        }
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Per-action options for [`ServiceBuilder::action_with`].
#[derive(Clone, Debug, Default)]
pub struct ActionOptions {
    cache: bool,
    params: Option<Value>,
    protected: bool,
}

impl ActionOptions {
    /// Creates default options: no caching, no schema, visible.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables result caching for this action.
    #[must_use]
    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Attaches a parameter schema, validated by the broker's validator.
    #[must_use]
    pub fn params(mut self, schema: Value) -> Self {
        self.params = Some(schema);
        self
    }

    /// Hides the action from listings while keeping it callable.
    #[must_use]
    pub fn protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }
}

/// Fluent builder for [`ServiceDescriptor`].
pub struct ServiceBuilder {
    name: String,
    version: Option<u32>,
    settings: Value,
    actions: Vec<(String, ActionOptions, ActionHandler)>,
    events: Vec<(String, Option<String>, EventHandler)>,
    created: Option<CreatedHook>,
    started: Option<LifecycleHook>,
    stopped: Option<LifecycleHook>,
}

impl ServiceBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            settings: Value::Null,
            actions: Vec::new(),
            events: Vec::new(),
            created: None,
            started: None,
            stopped: None,
        }
    }

    /// Sets the service version.
    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the opaque service settings.
    #[must_use]
    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    /// Adds an action with default options.
    ///
    /// `name` is the short name; the full name becomes
    /// `<service>.<name>` (with the version prefix for versioned
    /// services).
    #[must_use]
    pub fn action<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BrokerError>> + Send + 'static,
    {
        self.action_with(name, ActionOptions::default(), handler)
    }

    /// Adds an action with explicit options.
    #[must_use]
    pub fn action_with<F, Fut>(
        mut self,
        name: impl Into<String>,
        options: ActionOptions,
        handler: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BrokerError>> + Send + 'static,
    {
        let boxed: ActionHandler = Arc::new(move |ctx| Box::pin(handler(ctx)) as ActionFuture);
        self.actions.push((name.into(), options, boxed));
        self
    }

    /// Subscribes to an event in the default group (the service name).
    #[must_use]
    pub fn on_event<F, Fut>(self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_event_in_group_inner(event, None, handler)
    }

    /// Subscribes to an event in an explicit consumer group.
    #[must_use]
    pub fn on_event_in_group<F, Fut>(
        self,
        event: impl Into<String>,
        group: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_event_in_group_inner(event, Some(group.into()), handler)
    }

    fn on_event_in_group_inner<F, Fut>(
        mut self,
        event: impl Into<String>,
        group: Option<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: EventHandler = Arc::new(move |ctx| Box::pin(handler(ctx)) as EventFuture);
        self.events.push((event.into(), group, boxed));
        self
    }

    /// Sets the `created` hook, run when the service is registered.
    #[must_use]
    pub fn on_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Broker) + Send + Sync + 'static,
    {
        self.created = Some(Arc::new(hook));
        self
    }

    /// Sets the `started` hook, run during broker start.
    #[must_use]
    pub fn on_started<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Broker) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BrokerError>> + Send + 'static,
    {
        self.started = Some(Arc::new(move |broker| {
            Box::pin(hook(broker)) as LifecycleFuture
        }));
        self
    }

    /// Sets the `stopped` hook, run during broker stop.
    #[must_use]
    pub fn on_stopped<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Broker) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BrokerError>> + Send + 'static,
    {
        self.stopped = Some(Arc::new(move |broker| {
            Box::pin(hook(broker)) as LifecycleFuture
        }));
        self
    }

    /// Finalizes the descriptor, qualifying action names.
    #[must_use]
    pub fn finish(self) -> ServiceDescriptor {
        let full_name = match self.version {
            Some(version) => format!("v{version}.{}", self.name),
            None => self.name.clone(),
        };
        let actions = self
            .actions
            .into_iter()
            .map(|(short, options, handler)| {
                let qualified = format!("{full_name}.{short}");
                (
                    qualified.clone(),
                    ActionDescriptor {
                        name: qualified,
                        cache: options.cache,
                        params: options.params,
                        protected: options.protected,
                        handler: Some(handler),
                        compiled: None,
                    },
                )
            })
            .collect();
        let events = self
            .events
            .into_iter()
            .map(|(event, group, handler)| {
                (
                    event.clone(),
                    EventDescriptor {
                        name: event,
                        group,
                        handler: Some(handler),
                    },
                )
            })
            .collect();
        ServiceDescriptor {
            name: self.name,
            version: self.version,
            settings: self.settings,
            actions,
            events,
            created: self.created,
            started: self.started,
            stopped: self.stopped,
        }
    }
}


// Made with Bob
