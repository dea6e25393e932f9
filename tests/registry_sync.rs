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

//! Integration tests for discovery and registry reconciliation across
//! nodes: INFO snapshots, service removal, graceful disconnect, and
//! membership events.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmbus::transport::MemoryHub;
use swarmbus::{Broker, BrokerConfig, CallOptions, ServiceDescriptor};

fn echo_service(name: &str) -> ServiceDescriptor {
    let tag = name.to_string();
    ServiceDescriptor::build(name)
        .action("echo", move |_ctx| {
            let tag = tag.clone();
            async move { Ok(json!(tag)) }
        })
        .finish()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_late_service_registration_is_announced() {
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .build();
    let node_b = Broker::builder(BrokerConfig::new("node-b"))
        .transporter(hub.transporter())
        .build();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();

    // Registered after start: a fresh INFO broadcast carries it over.
    node_a.create_service(echo_service("late")).await.unwrap();
    node_b
        .wait_for_actions(&["late.echo"], Duration::from_secs(2))
        .await
        .unwrap();

    let result = node_b
        .call("late.echo", Value::Null, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!("late"));

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_destroyed_service_is_removed_by_reconcile() {
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .service(echo_service("s1"))
        .service(echo_service("s2"))
        .build();
    let node_b = Broker::builder(BrokerConfig::new("node-b"))
        .transporter(hub.transporter())
        .build();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    node_b
        .wait_for_actions(&["s1.echo", "s2.echo"], Duration::from_secs(2))
        .await
        .unwrap();

    // node-a's next INFO omits s2; node-b must drop its endpoints.
    node_a.destroy_service("s2", None).await.unwrap();
    settle().await;

    let err = node_b
        .call("s2.echo", Value::Null, CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SERVICE_NOT_FOUND");

    // s1 is untouched.
    let result = node_b
        .call("s1.echo", Value::Null, CallOptions::default())
        .await
        .unwrap();
    assert_eq!(result, json!("s1"));

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_graceful_disconnect_cascades() {
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .service(echo_service("math"))
        .build();

    let disconnects: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let disconnects_in_handler = Arc::clone(&disconnects);
    let watcher = ServiceDescriptor::build("watcher")
        .on_event("$node.disconnected", move |ctx| {
            let disconnects = Arc::clone(&disconnects_in_handler);
            let payload = ctx.params().clone();
            async move {
                disconnects.lock().unwrap().push(payload);
            }
        })
        .finish();
    let node_b = Broker::builder(BrokerConfig::new("node-b"))
        .transporter(hub.transporter())
        .service(watcher)
        .build();

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    node_b
        .wait_for_actions(&["math.echo"], Duration::from_secs(2))
        .await
        .unwrap();

    node_a.stop().await.unwrap();
    settle().await;

    // Endpoints of node-a are gone.
    let err = node_b
        .call("math.echo", Value::Null, CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SERVICE_NOT_FOUND");

    // A graceful departure is not "unexpected".
    let seen = disconnects.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["node"], "node-a");
    assert_eq!(seen[0]["unexpected"], false);
    drop(seen);

    node_b.stop().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_timeout_marks_unexpected_disconnect() {
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(
        // Slow heartbeats from node-a...
        BrokerConfig::new("node-a").with_heartbeat_interval(Duration::from_secs(60)),
    )
    .transporter(hub.transporter())
    .service(echo_service("math"))
    .build();

    let unexpected = Arc::new(AtomicU32::new(0));
    let unexpected_in_handler = Arc::clone(&unexpected);
    let watcher = ServiceDescriptor::build("watcher")
        .on_event("$node.disconnected", move |ctx| {
            let unexpected = Arc::clone(&unexpected_in_handler);
            let was_unexpected = ctx.params()["unexpected"].as_bool().unwrap_or(false);
            async move {
                if was_unexpected {
                    unexpected.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .finish();
    let node_b = Broker::builder(
        // ...and a tight liveness window on node-b.
        BrokerConfig::new("node-b")
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_heartbeat_timeout(Duration::from_millis(150)),
    )
    .transporter(hub.transporter())
    .service(watcher)
    .build();

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    node_b
        .wait_for_actions(&["math.echo"], Duration::from_secs(2))
        .await
        .unwrap();

    // node-a never heartbeats inside the window; node-b expires it.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(unexpected.load(Ordering::SeqCst) >= 1);
    let err = node_b
        .call("math.echo", Value::Null, CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "SERVICE_NOT_FOUND");

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_node_listing_via_internal_actions() {
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .service(echo_service("math"))
        .build();
    let node_b = Broker::builder(BrokerConfig::new("node-b"))
        .transporter(hub.transporter())
        .build();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    node_b
        .wait_for_actions(&["math.echo"], Duration::from_secs(2))
        .await
        .unwrap();

    let nodes = node_b
        .call("$node.list", Value::Null, CallOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = nodes
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"node-a"));
    assert!(ids.contains(&"node-b"));

    let actions = node_b
        .call(
            "$node.actions",
            json!({ "skipInternal": true, "withEndpoints": true }),
            CallOptions::default(),
        )
        .await
        .unwrap();
    let rows = actions.as_array().unwrap();
    assert!(rows.iter().any(|row| row["name"] == "math.echo"));
    assert!(rows.iter().all(|row| row["name"] != "$node.list"));

    // The remote $node service is callable across the cluster too.
    let remote_health = node_b
        .call(
            "$node.health",
            Value::Null,
            CallOptions::default().with_node_id("node-a"),
        )
        .await
        .unwrap();
    assert_eq!(remote_health["nodeID"], "node-a");

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}
