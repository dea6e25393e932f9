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

//! Tracking of in-flight requests awaiting responses.
//!
//! Each outbound REQUEST parks a slot keyed by its correlation id. The
//! slot resolves exactly once: by the matching RESPONSE, by local timeout
//! cancellation, by the target node disconnecting, or by broker shutdown.
//! Single-shot resolution is enforced by construction: resolving removes
//! the slot, and the `oneshot` sender is consumed by the send.

use crate::error::BrokerError;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

/// Outcome delivered through a pending slot.
pub type PendingResult = Result<Value, BrokerError>;

struct PendingSlot {
    sender: oneshot::Sender<PendingResult>,
    node_id: String,
}

/// In-flight requests keyed by correlation id.
///
/// Thread-safe; shared between the transit's send path and its receive
/// loop.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use swarmbus::transit::PendingRequests;
///
/// # async fn example() {
/// let pending = PendingRequests::new();
/// let rx = pending.register("ctx-1", "node-b").await;
///
/// // The receive loop resolves it when the RESPONSE arrives.
/// pending.complete("ctx-1", Ok(json!(5))).await;
/// assert_eq!(rx.await.unwrap().unwrap(), json!(5));
/// # }
/// ```
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<String, PendingSlot>>,
}

impl PendingRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a slot for a request sent to `node_id`.
    ///
    /// Returns the receiver the caller awaits on. At most one live slot
    /// exists per correlation id; registering the same id again replaces
    /// (and thereby cancels) the previous slot.
    pub async fn register(
        &self,
        correlation_id: &str,
        node_id: &str,
    ) -> oneshot::Receiver<PendingResult> {
        let (sender, receiver) = oneshot::channel();
        self.slots.lock().await.insert(
            correlation_id.to_string(),
            PendingSlot {
                sender,
                node_id: node_id.to_string(),
            },
        );
        receiver
    }

    /// Resolves a slot with the response outcome.
    ///
    /// Returns `false` when no slot exists (already resolved, timed out,
    /// or never registered, e.g. a straggler response after timeout).
    pub async fn complete(&self, correlation_id: &str, result: PendingResult) -> bool {
        match self.slots.lock().await.remove(correlation_id) {
            Some(slot) => slot.sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Drops a slot without resolving it (local timeout path; the caller
    /// already produced its own error).
    pub async fn cancel(&self, correlation_id: &str) -> bool {
        self.slots.lock().await.remove(correlation_id).is_some()
    }

    /// Rejects every slot targeting a node that disconnected.
    ///
    /// Returns how many slots were rejected.
    pub async fn reject_node(&self, node_id: &str) -> usize {
        let mut slots = self.slots.lock().await;
        let ids: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(slot) = slots.remove(id) {
                let _ = slot.sender.send(Err(BrokerError::NodeDisconnected {
                    node_id: node_id.to_string(),
                }));
            }
        }
        ids.len()
    }

    /// Rejects every slot because the local broker is stopping.
    ///
    /// Returns how many slots were rejected.
    pub async fn reject_all_stopping(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let count = slots.len();
        for (_, slot) in slots.drain() {
            let _ = slot.sender.send(Err(BrokerError::BrokerStopping));
        }
        count
    }

    /// Rejects every slot because the transport connection was lost.
    ///
    /// Returns how many slots were rejected.
    pub async fn reject_all_transport_lost(&self, reason: &str) -> usize {
        let mut slots = self.slots.lock().await;
        let count = slots.len();
        for (_, slot) in slots.drain() {
            let _ = slot.sender.send(Err(BrokerError::Transport(
                crate::transport::TransportError::Disconnected {
                    reason: reason.to_string(),
                },
            )));
        }
        count
    }

    /// Number of in-flight requests.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Returns `true` when no requests are in flight.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_complete() {
        let pending = PendingRequests::new();
        let rx = pending.register("ctx-1", "node-b").await;
        assert_eq!(pending.len().await, 1);

        assert!(pending.complete("ctx-1", Ok(json!(5))).await);
        assert_eq!(rx.await.unwrap().unwrap(), json!(5));
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_straggler_response_is_dropped() {
        let pending = PendingRequests::new();
        assert!(!pending.complete("ghost", Ok(json!(1))).await);
    }

    #[tokio::test]
    async fn test_cancel_makes_receiver_err() {
        let pending = PendingRequests::new();
        let rx = pending.register("ctx-1", "node-b").await;
        assert!(pending.cancel("ctx-1").await);
        assert!(rx.await.is_err());
        // Resolution is single-shot: the slot is gone.
        assert!(!pending.complete("ctx-1", Ok(json!(1))).await);
    }

    #[tokio::test]
    async fn test_reject_node_targets_only_that_node() {
        let pending = PendingRequests::new();
        let rx_b = pending.register("ctx-1", "node-b").await;
        let rx_c = pending.register("ctx-2", "node-c").await;

        assert_eq!(pending.reject_node("node-b").await, 1);
        match rx_b.await.unwrap() {
            Err(BrokerError::NodeDisconnected { node_id }) => assert_eq!(node_id, "node-b"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(pending.len().await, 1);
        pending.complete("ctx-2", Ok(json!(2))).await;
        assert_eq!(rx_c.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_reject_all_on_stop() {
        let pending = PendingRequests::new();
        let rx1 = pending.register("ctx-1", "node-b").await;
        let rx2 = pending.register("ctx-2", "node-c").await;

        assert_eq!(pending.reject_all_stopping().await, 2);
        assert!(matches!(
            rx1.await.unwrap(),
            Err(BrokerError::BrokerStopping)
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(BrokerError::BrokerStopping)
        ));
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn test_reject_all_on_transport_loss() {
        let pending = PendingRequests::new();
        let rx = pending.register("ctx-1", "node-b").await;
        assert_eq!(pending.reject_all_transport_lost("test").await, 1);
        assert!(matches!(
            rx.await.unwrap(),
            Err(BrokerError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resolution() {
        use std::sync::Arc;

        let pending = Arc::new(PendingRequests::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let pending = Arc::clone(&pending);
            handles.push(tokio::spawn(async move {
                let id = format!("ctx-{i}");
                let rx = pending.register(&id, "node-b").await;
                pending.complete(&id, Ok(json!(i))).await;
                rx.await.unwrap().unwrap()
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), json!(i));
        }
        assert!(pending.is_empty().await);
    }
}

// Made with Bob
