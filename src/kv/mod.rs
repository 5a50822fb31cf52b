//! TTL-bounded key-value store.
//!
//! Holds the short-lived records the site needs outside the relational
//! store: admin session records, login-failure counters, and the raffle
//! live-stream config. Entries expire lazily on read once their deadline
//! passes, mirroring provider-enforced TTL expiry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Entry {
    value: String,
    deadline: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
pub struct Kv {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Outcome of a throttle hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed { remaining: u32 },
    Limited { reset_at: u64 },
}

/// Counter state kept under the throttle key, with an absolute reset time
/// so repeated hits never extend the window.
#[derive(Debug, Serialize, Deserialize)]
struct ThrottleState {
    n: u32,
    reset_at: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

impl Kv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.expired(now)) {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    pub async fn delete(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
    }

    /// Count a hit against `key` within a rolling window of `window` seconds.
    ///
    /// The counter keeps its original reset time for the life of the window;
    /// once `limit` hits are recorded, further hits are `Limited` until the
    /// window elapses.
    pub async fn hit(&self, key: &str, limit: u32, window: u64) -> ThrottleDecision {
        let now = unix_now();

        let mut state = self
            .get(key)
            .await
            .and_then(|raw| serde_json::from_str::<ThrottleState>(&raw).ok())
            .filter(|state| now < state.reset_at)
            .unwrap_or(ThrottleState {
                n: 0,
                reset_at: now + window,
            });

        if state.n >= limit {
            return ThrottleDecision::Limited {
                reset_at: state.reset_at,
            };
        }

        state.n += 1;

        let ttl = Duration::from_secs(state.reset_at.saturating_sub(now).max(1));
        if let Ok(raw) = serde_json::to_string(&state) {
            self.put(key, &raw, Some(ttl)).await;
        }

        ThrottleDecision::Allowed {
            remaining: limit.saturating_sub(state.n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let kv = Kv::new();
        kv.put("k", "v", None).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("v"));

        kv.delete("k").await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let kv = Kv::new();
        kv.put("k", "v", Some(Duration::from_millis(20))).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn overwrite_replaces_value_and_ttl() {
        let kv = Kv::new();
        kv.put("k", "old", Some(Duration::from_millis(10))).await;
        kv.put("k", "new", None).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn hit_limits_after_threshold() {
        let kv = Kv::new();
        for n in 0..3 {
            let decision = kv.hit("fail:1.2.3.4", 3, 600).await;
            assert_eq!(decision, ThrottleDecision::Allowed { remaining: 2 - n });
        }

        match kv.hit("fail:1.2.3.4", 3, 600).await {
            ThrottleDecision::Limited { reset_at } => assert!(reset_at > unix_now()),
            other => panic!("expected Limited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hit_counter_clears_with_delete() {
        let kv = Kv::new();
        for _ in 0..3 {
            kv.hit("fail:ip", 3, 600).await;
        }
        assert!(matches!(
            kv.hit("fail:ip", 3, 600).await,
            ThrottleDecision::Limited { .. }
        ));

        kv.delete("fail:ip").await;
        assert!(matches!(
            kv.hit("fail:ip", 3, 600).await,
            ThrottleDecision::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn hit_window_resets_after_expiry() {
        let kv = Kv::new();
        // 1 second is the smallest window the unix-seconds state can express.
        for _ in 0..2 {
            kv.hit("fail:ip", 2, 1).await;
        }
        assert!(matches!(
            kv.hit("fail:ip", 2, 1).await,
            ThrottleDecision::Limited { .. }
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(matches!(
            kv.hit("fail:ip", 2, 1).await,
            ThrottleDecision::Allowed { .. }
        ));
    }
}
