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

//! The middleware chain.
//!
//! Middleware wraps action dispatch: each layer receives the next handler
//! and returns a new one, seeing every call's context on the way in and
//! its result on the way out. The first registered middleware is the
//! outermost layer. Registration is only possible before the broker
//! starts; the chain is fixed afterward.
//!
//! Middleware runs on both sides of a remote call: around the
//! caller-side dispatch (which may forward to a remote node) and around
//! the executor-side local invocation.
//!
//! A middleware may transform an error but must preserve its kind;
//! callers and the retry loop dispatch on
//! [`BrokerError::kind`](crate::BrokerError::kind).

use crate::context::Context;
use crate::service::ActionFuture;
use std::sync::Arc;

/// The continuation a middleware wraps.
pub type Next = Arc<dyn Fn(Context) -> ActionFuture + Send + Sync>;

/// One layer of the call chain.
///
/// Any `Fn(Next) -> Next` closure is a middleware; implement the trait
/// directly when the layer carries state or a name worth logging.
///
/// # Examples
///
/// ```rust
/// use swarmbus::middleware::Next;
/// use swarmbus::service::ActionFuture;
/// use swarmbus::{Broker, BrokerConfig};
/// use std::sync::Arc;
///
/// // A timing layer as a plain closure.
/// let broker = Broker::builder(BrokerConfig::default())
///     .middleware(|next: Next| -> Next {
///         Arc::new(move |ctx| {
///             let next = Arc::clone(&next);
///             Box::pin(async move {
///                 let started = std::time::Instant::now();
///                 let result = next(ctx).await;
///                 tracing::debug!(elapsed = ?started.elapsed(), "call finished");
///                 result
///             }) as ActionFuture
///         })
///     })
///     .build();
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Wraps the next handler, returning the layered one.
    fn wrap(&self, next: Next) -> Next;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "middleware"
    }
}

impl<F> Middleware for F
where
    F: Fn(Next) -> Next + Send + Sync + 'static,
{
    fn wrap(&self, next: Next) -> Next {
        self(next)
    }
}

/// Composes the chain around a base handler.
///
/// Folding right to left keeps registration order: the first registered
/// middleware ends up outermost.
pub(crate) fn compose(chain: &[Arc<dyn Middleware>], handler: Next) -> Next {
    chain
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}


// Made with Bob
