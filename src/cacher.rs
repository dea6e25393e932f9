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

//! Result caching pluggable.
//!
//! When a cacher is configured and an action's cache policy is set, the
//! broker fingerprints each call (`action name + params hash`), probes the
//! cache before dispatching, and stores successful results afterward. The
//! broker never inspects cached values.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Cache backend contract.
///
/// Implementations must be safe for concurrent use; all operations are
/// async so networked backends (Redis and friends) fit behind the same
/// trait as the in-memory one.
#[async_trait]
pub trait Cacher: Send + Sync + 'static {
    /// Looks up a cached value.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores a value, with an optional per-entry TTL overriding the
    /// backend default.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Removes a single entry.
    async fn del(&self, key: &str);

    /// Removes all entries matching a pattern.
    ///
    /// Patterns use `*` as a trailing wildcard: `math.*` clears every key
    /// with the `math.` prefix, `*` clears everything.
    async fn clean(&self, pattern: &str);
}

/// Computes the cache fingerprint for a call.
///
/// The fingerprint is the action name plus a hash of the canonical JSON
/// encoding of the params. Object keys in `serde_json` maps are ordered,
/// so semantically equal params hash equally.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use swarmbus::cacher::cache_key;
///
/// let a = cache_key("math.add", &json!({ "a": 1, "b": 2 }));
/// let b = cache_key("math.add", &json!({ "b": 2, "a": 1 }));
/// assert_eq!(a, b);
/// ```
#[must_use]
pub fn cache_key(action: &str, params: &Value) -> String {
    let canonical = params.to_string();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{action}:{:016x}", hasher.finish())
}

struct CacheSlot {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-memory cache with per-entry TTLs.
///
/// Entries expire lazily: an expired slot is dropped on the next `get`
/// that touches it. Suitable for single-process deployments and tests; a
/// shared backend is needed for cache coherence across nodes.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use swarmbus::cacher::{Cacher, MemoryCacher};
/// use std::time::Duration;
///
/// # async fn example() {
/// let cacher = MemoryCacher::new(Some(Duration::from_secs(30)));
/// cacher.set("k", json!(5), None).await;
/// assert_eq!(cacher.get("k").await, Some(json!(5)));
/// cacher.del("k").await;
/// assert_eq!(cacher.get("k").await, None);
/// # }
/// ```
pub struct MemoryCacher {
    entries: Mutex<HashMap<String, CacheSlot>>,
    default_ttl: Option<Duration>,
}

impl MemoryCacher {
    /// Creates a cacher with the given default TTL (`None` = no expiry).
    #[must_use]
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Returns the number of live entries, counting unexpired slots only.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|slot| slot.expires_at.map_or(true, |at| at > now))
            .count()
    }

    /// Returns `true` if the cache holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCacher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(slot) if slot.expires_at.map_or(true, |at| at > Instant::now()) => {
                Some(slot.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .await
            .insert(key.to_string(), CacheSlot { value, expires_at });
    }

    async fn del(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    async fn clean(&self, pattern: &str) {
        let mut entries = self.entries.lock().await;
        if pattern == "*" {
            entries.clear();
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            entries.retain(|key, _| !key.starts_with(prefix));
        } else {
            entries.remove(pattern);
        }
    }
}


// Made with Bob
