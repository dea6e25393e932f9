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

//! Integration tests for event delivery: group-balanced emit, broadcast
//! fan-out, group restriction, and local-only emission.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmbus::transport::MemoryHub;
use swarmbus::{Broker, BrokerConfig, ServiceDescriptor};

type DeliveryLog = Arc<Mutex<Vec<(String, String)>>>;

/// A service subscribing to `user.created`, logging `(service, node)`
/// deliveries.
fn subscriber(service: &str, node: &str, log: &DeliveryLog) -> ServiceDescriptor {
    let log = Arc::clone(log);
    let service_name = service.to_string();
    let node_name = node.to_string();
    ServiceDescriptor::build(service)
        .on_event("user.created", move |_ctx| {
            let log = Arc::clone(&log);
            let entry = (service_name.clone(), node_name.clone());
            async move {
                log.lock().unwrap().push(entry);
            }
        })
        .finish()
}

struct Cluster {
    brokers: Vec<Broker>,
}

impl Cluster {
    /// Builds `consumer` on node-a and node-b, `audit` on node-c, and a
    /// bare emitter on node-d, all on one hub.
    async fn start(log: &DeliveryLog) -> Self {
        let hub = Arc::new(MemoryHub::new());
        let node_a = Broker::builder(BrokerConfig::new("node-a"))
            .transporter(hub.transporter())
            .service(subscriber("consumer", "node-a", log))
            .build();
        let node_b = Broker::builder(BrokerConfig::new("node-b"))
            .transporter(hub.transporter())
            .service(subscriber("consumer", "node-b", log))
            .build();
        let node_c = Broker::builder(BrokerConfig::new("node-c"))
            .transporter(hub.transporter())
            .service(subscriber("audit", "node-c", log))
            .build();
        let node_d = Broker::builder(BrokerConfig::new("node-d"))
            .transporter(hub.transporter())
            .build();
        for broker in [&node_a, &node_b, &node_c, &node_d] {
            broker.start().await.unwrap();
        }
        // Let all INFO snapshots settle.
        tokio::time::sleep(Duration::from_millis(150)).await;
        Self {
            brokers: vec![node_a, node_b, node_c, node_d],
        }
    }

    fn emitter(&self) -> &Broker {
        &self.brokers[3]
    }

    async fn stop(self) {
        for broker in &self.brokers {
            broker.stop().await.unwrap();
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_emit_delivers_once_per_group() {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let cluster = Cluster::start(&log).await;

    cluster
        .emitter()
        .emit("user.created", json!({ "id": 1 }))
        .await
        .unwrap();
    settle().await;

    let deliveries = log.lock().unwrap().clone();
    let mut per_service: HashMap<&str, usize> = HashMap::new();
    for (service, _node) in &deliveries {
        *per_service.entry(service.as_str()).or_default() += 1;
    }
    // One delivery to the consumer group (node-a or node-b), one to the
    // audit group on node-c.
    assert_eq!(per_service.get("consumer"), Some(&1));
    assert_eq!(per_service.get("audit"), Some(&1));
    assert_eq!(deliveries.len(), 2);

    cluster.stop().await;
}

#[tokio::test]
async fn test_emit_balances_across_group_members() {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let cluster = Cluster::start(&log).await;

    for i in 0..10 {
        cluster
            .emitter()
            .emit("user.created", json!({ "id": i }))
            .await
            .unwrap();
    }
    settle().await;

    let deliveries = log.lock().unwrap().clone();
    let consumer_nodes: Vec<&str> = deliveries
        .iter()
        .filter(|(service, _)| service == "consumer")
        .map(|(_, node)| node.as_str())
        .collect();
    // Ten emissions, ten consumer deliveries, spread over both nodes by
    // the round-robin strategy.
    assert_eq!(consumer_nodes.len(), 10);
    assert!(consumer_nodes.contains(&"node-a"));
    assert!(consumer_nodes.contains(&"node-b"));

    cluster.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_subscriber() {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let cluster = Cluster::start(&log).await;

    cluster
        .emitter()
        .broadcast("user.created", json!({ "id": 1 }))
        .await
        .unwrap();
    settle().await;

    let mut deliveries = log.lock().unwrap().clone();
    deliveries.sort();
    // Every (service, node) pair got exactly one copy.
    assert_eq!(
        deliveries,
        vec![
            ("audit".to_string(), "node-c".to_string()),
            ("consumer".to_string(), "node-a".to_string()),
            ("consumer".to_string(), "node-b".to_string()),
        ]
    );

    cluster.stop().await;
}

#[tokio::test]
async fn test_emit_restricted_to_groups() {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let cluster = Cluster::start(&log).await;

    cluster
        .emitter()
        .emit_grouped(
            "user.created",
            json!({ "id": 1 }),
            vec!["audit".to_string()],
        )
        .await
        .unwrap();
    settle().await;

    let deliveries = log.lock().unwrap().clone();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "audit");

    cluster.stop().await;
}

#[tokio::test]
async fn test_emit_local_stays_local() {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let hub = Arc::new(MemoryHub::new());
    let node_a = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .service(subscriber("consumer", "node-a", &log))
        .build();
    let node_b = Broker::builder(BrokerConfig::new("node-b"))
        .transporter(hub.transporter())
        .service(subscriber("consumer", "node-b", &log))
        .build();
    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    node_a.emit_local("user.created", json!({ "id": 1 })).await;
    settle().await;

    let deliveries = log.lock().unwrap().clone();
    assert_eq!(deliveries, vec![("consumer".to_string(), "node-a".to_string())]);

    node_b.stop().await.unwrap();
    node_a.stop().await.unwrap();
}

#[tokio::test]
async fn test_context_emit_parents_the_event() {
    let hub = Arc::new(MemoryHub::new());
    let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in_handler = Arc::clone(&seen);

    let service = ServiceDescriptor::build("orders")
        .action("create", |ctx| async move {
            ctx.emit("order.created", json!({ "id": 9 })).await?;
            Ok(json!("ok"))
        })
        .on_event("order.created", move |ctx| {
            let seen = Arc::clone(&seen_in_handler);
            let entry = (ctx.request_id().to_string(), ctx.level());
            async move {
                seen.lock().unwrap().push(entry);
            }
        })
        .finish();

    let broker = Broker::builder(BrokerConfig::new("node-a"))
        .transporter(hub.transporter())
        .service(service)
        .build();
    broker.start().await.unwrap();

    let root = swarmbus::CallOptions::default();
    broker
        .call("orders.create", Value::Null, root)
        .await
        .unwrap();
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    // The event context is a child of the action call: level 2, same
    // request id as the root call.
    assert_eq!(seen[0].1, 2);

    broker.stop().await.unwrap();
}
