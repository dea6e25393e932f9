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

//! The built-in `$node` service.
//!
//! Registered at broker start (unless disabled in config), it exposes the
//! registry's projections as ordinary actions, so any node can inspect
//! the cluster through a plain `call`:
//!
//! - `$node.list`: known nodes and their liveness
//! - `$node.services`: service instances by node
//! - `$node.actions` / `$node.events`: catalog entries, with
//!   `onlyLocal` / `skipInternal` / `withEndpoints` filter params
//! - `$node.health`: uptime and pending-request gauge of the node

use crate::registry::ListOptions;
use crate::service::ServiceDescriptor;
use serde_json::{json, Value};

fn list_options(params: &Value) -> ListOptions {
    ListOptions {
        only_local: params["onlyLocal"].as_bool().unwrap_or(false),
        skip_internal: params["skipInternal"].as_bool().unwrap_or(false),
        with_endpoints: params["withEndpoints"].as_bool().unwrap_or(false),
    }
}

/// Builds the `$node` service descriptor.
pub(crate) fn node_service() -> ServiceDescriptor {
    ServiceDescriptor::build("$node")
        .action("list", |ctx| async move {
            Ok(Value::Array(ctx.broker().registry().list_nodes()))
        })
        .action("services", |ctx| async move {
            Ok(Value::Array(ctx.broker().registry().list_services()))
        })
        .action("actions", |ctx| async move {
            let opts = list_options(ctx.params());
            Ok(Value::Array(ctx.broker().registry().list_actions(&opts)))
        })
        .action("events", |ctx| async move {
            let opts = list_options(ctx.params());
            Ok(Value::Array(ctx.broker().registry().list_events(&opts)))
        })
        .action("health", |ctx| async move {
            let broker = ctx.broker().clone();
            let pending = broker.pending_requests().await;
            Ok(json!({
                "nodeID": broker.node_id(),
                "uptime": broker.uptime_secs(),
                "pendingRequests": pending,
            }))
        })
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_service_shape() {
        let service = node_service();
        assert_eq!(service.full_name(), "$node");
        for action in ["list", "services", "actions", "events", "health"] {
            let qualified = format!("$node.{action}");
            assert!(
                service.actions.contains_key(&qualified),
                "missing {qualified}"
            );
        }
    }

    #[test]
    fn test_list_options_parsing() {
        let opts = list_options(&json!({ "onlyLocal": true, "withEndpoints": true }));
        assert!(opts.only_local);
        assert!(!opts.skip_internal);
        assert!(opts.with_endpoints);

        let defaults = list_options(&Value::Null);
        assert!(!defaults.only_local);
    }
}

// Made with Bob
