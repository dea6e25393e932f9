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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

//! # Swarmbus: a transport-agnostic microservices broker
//!
//! A [`Broker`] hosts named services, exposes their actions as callable
//! remote procedures, and routes calls and events across a cluster of
//! peer brokers:
//!
//! - **Registry**: the in-memory catalog answering "who can serve action
//!   X right now?" ([`registry`])
//! - **Discovery**: INFO snapshots reconciled idempotently, heartbeats,
//!   disconnect cascades ([`registry`], [`transit`])
//! - **Selection**: pluggable strategies, per-endpoint circuit breaking,
//!   retries, per-call [`Context`] ([`strategy`], [`circuit`])
//! - **Protocol**: nine packet kinds over pluggable transports and
//!   serializers ([`packet`], [`transport`], [`serialization`])
//!
//! ## Layers
//!
//! - [`broker`]: lifecycle, `call` / `emit` / `broadcast`, middleware
//! - [`registry`]: node / service / action / event catalogs
//! - [`transit`]: packet pump, request correlation, discovery flows
//! - [`transport`]: the byte substrate behind the [`transport::Transporter`] trait
//! - [`serialization`], [`cacher`], [`validator`], [`strategy`]: the
//!   remaining pluggables
//!
//! ## Quick start
//!
//! ```rust
//! use serde_json::json;
//! use swarmbus::{Broker, BrokerConfig, CallOptions, ServiceDescriptor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::builder(BrokerConfig::default())
//!     .service(
//!         ServiceDescriptor::build("math")
//!             .action("add", |ctx| async move {
//!                 let a = ctx.params()["a"].as_i64().unwrap_or(0);
//!                 let b = ctx.params()["b"].as_i64().unwrap_or(0);
//!                 Ok(json!(a + b))
//!             })
//!             .finish(),
//!     )
//!     .build();
//! broker.start().await?;
//!
//! let sum = broker
//!     .call("math.add", json!({ "a": 2, "b": 3 }), CallOptions::default())
//!     .await?;
//! assert_eq!(sum, json!(5));
//!
//! broker.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Swarmbus is written in 100% safe Rust with `#![deny(unsafe_code)]`.
//! All concurrency is handled through Tokio's async runtime.

pub mod broker;
pub mod cacher;
pub mod circuit;
pub mod config;
pub mod context;
pub mod error;
mod internal;
pub mod middleware;
pub mod packet;
pub mod registry;
pub mod serialization;
pub mod service;
pub mod strategy;
pub mod transit;
pub mod transport;
pub mod validator;

pub use broker::{Broker, BrokerBuilder, CallOptions};
pub use cacher::{Cacher, MemoryCacher};
pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{BrokerConfig, CircuitBreakerConfig};
pub use context::Context;
pub use error::{BrokerError, ErrorEnvelope};
pub use middleware::Middleware;
pub use packet::{Packet, PacketKind, Topic, PROTOCOL_VERSION};
pub use registry::{ActionEndpoint, ListOptions, Registry, SelectOptions};
pub use serialization::{JsonSerializer, Serializer};
pub use service::{ActionOptions, ServiceDescriptor};
pub use strategy::{RandomStrategy, RoundRobinStrategy, Strategy, StrategyKind};
pub use transport::{MemoryHub, MemoryTransporter, Transporter};
pub use validator::{SchemaValidator, Validator};
