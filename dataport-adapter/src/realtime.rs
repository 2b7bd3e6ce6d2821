//! Realtime subscriptions
//!
//! The adapter owns a [`SubscriptionRegistry`] mapping a channel name to the
//! handle of its live subscription. The wire client behind the handles is a
//! [`RealtimeTransport`] supplied by the application.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use dataport_common::error::Result;

/// Row change delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// `INSERT`, `UPDATE` or `DELETE`
    pub event_type: String,
    pub schema: String,
    pub table: String,
    /// Row after the change, `Null` for deletes
    pub record: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<JsonValue>,
}

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// A live subscription; closing it stops delivery
pub trait RealtimeHandle: Send + Sync {
    fn close(&self);
}

/// Opens change-feed subscriptions on the backend
pub trait RealtimeTransport: Send + Sync {
    fn open(
        &self,
        channel: &str,
        table: &str,
        callback: ChangeCallback,
    ) -> Result<Box<dyn RealtimeHandle>>;
}

/// Channel name to live handle, owned by one adapter instance
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: Mutex<HashMap<String, Box<dyn RealtimeHandle>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `channel`, closing any handle it replaces.
    /// Returns true if a previous subscription was replaced.
    pub fn insert(&self, channel: &str, handle: Box<dyn RealtimeHandle>) -> bool {
        let previous = self.channels.lock().insert(channel.to_string(), handle);
        match previous {
            Some(old) => {
                debug!(channel, "replacing existing subscription");
                old.close();
                true
            }
            None => false,
        }
    }

    /// Close and forget `channel`; unknown channels are ignored
    pub fn remove(&self, channel: &str) -> bool {
        let removed = self.channels.lock().remove(channel);
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.lock().contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    pub fn close_all(&self) {
        let drained: Vec<_> = self.channels.lock().drain().collect();
        for (_, handle) in drained {
            handle.close();
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for (_, handle) in self.channels.get_mut().drain() {
            handle.close();
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels: Vec<String> = self.channels.lock().keys().cloned().collect();
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &channels)
            .finish()
    }
}

// ============================================================================
// In-process broadcast
// ============================================================================

struct Listener {
    table: String,
    callback: ChangeCallback,
}

/// Delivers change events published in-process to listeners on a table
#[derive(Default)]
pub struct LocalBroadcast {
    listeners: Arc<RwLock<HashMap<u64, Listener>>>,
    next_id: AtomicU64,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every listener on its table
    pub fn publish(&self, event: &ChangeEvent) {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .read()
            .values()
            .filter(|l| l.table == event.table)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

struct LocalHandle {
    id: u64,
    listeners: Arc<RwLock<HashMap<u64, Listener>>>,
}

impl RealtimeHandle for LocalHandle {
    fn close(&self) {
        self.listeners.write().remove(&self.id);
    }
}

impl RealtimeTransport for LocalBroadcast {
    fn open(
        &self,
        channel: &str,
        table: &str,
        callback: ChangeCallback,
    ) -> Result<Box<dyn RealtimeHandle>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(channel, table, id, "opening local subscription");
        self.listeners.write().insert(
            id,
            Listener {
                table: table.to_string(),
                callback,
            },
        );
        Ok(Box::new(LocalHandle {
            id,
            listeners: Arc::clone(&self.listeners),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (ChangeCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let callback: ChangeCallback = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    fn event(table: &str) -> ChangeEvent {
        ChangeEvent {
            event_type: "INSERT".to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            record: serde_json::json!({"id": 1}),
            old_record: None,
        }
    }

    #[test]
    fn test_insert_replaces_and_closes_previous() {
        let broadcast = LocalBroadcast::new();
        let registry = SubscriptionRegistry::new();
        let (first, first_count) = counting_callback();
        let (second, second_count) = counting_callback();

        assert!(!registry.insert("posts", broadcast.open("posts", "posts", first).unwrap()));
        assert!(registry.insert("posts", broadcast.open("posts", "posts", second).unwrap()));
        assert_eq!(registry.len(), 1);
        assert_eq!(broadcast.listener_count(), 1);

        broadcast.publish(&event("posts"));
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let broadcast = LocalBroadcast::new();
        let registry = SubscriptionRegistry::new();
        let (callback, count) = counting_callback();
        registry.insert("posts", broadcast.open("posts", "posts", callback).unwrap());

        assert!(registry.remove("posts"));
        assert!(!registry.remove("posts"));
        assert!(!registry.remove("never-subscribed"));

        broadcast.publish(&event("posts"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_publish_only_reaches_matching_table() {
        let broadcast = LocalBroadcast::new();
        let (callback, count) = counting_callback();
        let _handle = broadcast.open("c", "comments", callback).unwrap();
        broadcast.publish(&event("posts"));
        broadcast.publish(&event("comments"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_handles() {
        let broadcast = LocalBroadcast::new();
        {
            let registry = SubscriptionRegistry::new();
            let (callback, _) = counting_callback();
            registry.insert("posts", broadcast.open("posts", "posts", callback).unwrap());
            assert_eq!(broadcast.listener_count(), 1);
        }
        assert_eq!(broadcast.listener_count(), 0);
    }
}
