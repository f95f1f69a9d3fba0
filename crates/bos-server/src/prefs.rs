//! Typed preference store with change observers.
//!
//! The supervisor persists its port assignments and behavior flags in the
//! host's local-state preferences. The store is injected so tests run
//! against an in-memory instance, and the manager subscribes to exactly the
//! keys it reacts to, unsubscribing at shutdown.

use bos_common::{ServerError, ServerResult};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::ports::{DEFAULT_CDP_PORT, DEFAULT_PROXY_PORT};

// Preference keys. The deprecated keys are registered read-only and consulted
// only by the one-time migration.
pub const CDP_SERVER_PORT: &str = "browseros.server.cdp_port";
pub const PROXY_PORT: &str = "browseros.server.proxy_port";
pub const SERVER_PORT: &str = "browseros.server.server_port";
pub const EXTENSION_SERVER_PORT: &str = "browseros.server.extension_port";
pub const AGENT_SERVER_PORT: &str = "browseros.server.agent_port";
pub const ALLOW_REMOTE_IN_MCP: &str = "browseros.server.allow_remote_in_mcp";
pub const RESTART_SERVER_REQUESTED: &str = "browseros.server.restart_requested";
pub const SERVER_VERSION: &str = "browseros.server.version";

// Deprecated (kept for migration).
pub const DEPRECATED_MCP_SERVER_PORT: &str = "browseros.server.mcp_port";

/// Identifier for an observer registration.
pub type SubscriptionId = u64;

/// Typed key/value preference store with observer registration.
///
/// Getters return the registered default for unknown keys; setters on
/// unregistered keys are ignored with a warning. Observers receive the key
/// name over their channel when a value actually changes.
pub trait PrefStore: Send + Sync {
    fn get_integer(&self, key: &str) -> i32;
    fn set_integer(&self, key: &str, value: i32);
    fn get_boolean(&self, key: &str) -> bool;
    fn set_boolean(&self, key: &str, value: bool);
    fn get_string(&self, key: &str) -> String;
    fn set_string(&self, key: &str, value: &str);

    /// Subscribe to change notifications for the given keys. The key name is
    /// sent on `tx` whenever its value changes.
    fn subscribe(&self, keys: &[&str], tx: UnboundedSender<String>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

struct Subscriber {
    id: SubscriptionId,
    keys: Vec<String>,
    tx: UnboundedSender<String>,
}

struct PrefInner {
    defaults: HashMap<String, Value>,
    values: HashMap<String, Value>,
    path: Option<PathBuf>,
    subscribers: Vec<Subscriber>,
    next_subscription_id: SubscriptionId,
}

/// Default [`PrefStore`]: registered defaults plus an optional JSON file.
///
/// Every mutation is persisted with an atomic temp-file-then-rename write so
/// a crash mid-write never corrupts the stored ports.
pub struct LocalPrefStore {
    inner: Mutex<PrefInner>,
}

impl LocalPrefStore {
    /// Create a store persisted at `path`, loading any existing values.
    pub fn new(path: PathBuf) -> Self {
        let values = Self::load_values(&path);
        Self {
            inner: Mutex::new(PrefInner {
                defaults: HashMap::new(),
                values,
                path: Some(path),
                subscribers: Vec::new(),
                next_subscription_id: 1,
            }),
        }
    }

    /// Create a purely in-memory store (used by tests).
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(PrefInner {
                defaults: HashMap::new(),
                values: HashMap::new(),
                path: None,
                subscribers: Vec::new(),
                next_subscription_id: 1,
            }),
        }
    }

    /// Register a default value for a key. Registration does not overwrite a
    /// previously persisted value.
    pub fn register_default(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.defaults.insert(key.to_string(), value);
    }

    fn load_values(path: &PathBuf) -> HashMap<String, Value> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str::<HashMap<String, Value>>(&content) {
            Ok(values) => values,
            Err(e) => {
                warn!("Unreadable pref file {}, starting fresh: {}", path.display(), e);
                HashMap::new()
            }
        }
    }

    fn persist(inner: &PrefInner) -> ServerResult<()> {
        let path = match &inner.path {
            Some(p) => p,
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ServerError::io("create pref directory", &e))?;
        }

        let json = serde_json::to_string_pretty(&inner.values)
            .map_err(|e| ServerError::configuration(format!("serialize prefs: {}", e)))?;

        // Atomic write: temp file, then rename.
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json).map_err(|e| ServerError::io("write pref file", &e))?;
        std::fs::rename(&temp_path, path).map_err(|e| ServerError::io("rename pref file", &e))?;

        Ok(())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .values
            .get(key)
            .or_else(|| inner.defaults.get(key))
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let notify: Vec<UnboundedSender<String>>;
        {
            let mut inner = self.inner.lock().unwrap();

            if !inner.defaults.contains_key(key) {
                warn!("Ignoring write to unregistered pref: {}", key);
                return;
            }

            let previous = inner
                .values
                .get(key)
                .or_else(|| inner.defaults.get(key))
                .cloned();
            if previous.as_ref() == Some(&value) {
                return;
            }

            inner.values.insert(key.to_string(), value);
            if let Err(e) = Self::persist(&inner) {
                warn!("Failed to persist prefs: {}", e);
            }

            notify = inner
                .subscribers
                .iter()
                .filter(|s| s.keys.iter().any(|k| k == key))
                .map(|s| s.tx.clone())
                .collect();
        }

        for tx in notify {
            let _ = tx.send(key.to_string());
        }
    }
}

impl PrefStore for LocalPrefStore {
    fn get_integer(&self, key: &str) -> i32 {
        self.get(key)
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(0)
    }

    fn set_integer(&self, key: &str, value: i32) {
        self.set(key, Value::from(value));
    }

    fn get_boolean(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    fn set_boolean(&self, key: &str, value: bool) {
        self.set(key, Value::from(value));
    }

    fn get_string(&self, key: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default()
    }

    fn set_string(&self, key: &str, value: &str) {
        self.set(key, Value::from(value));
    }

    fn subscribe(&self, keys: &[&str], tx: UnboundedSender<String>) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            tx,
        });
        debug!("Pref subscription {} registered for {:?}", id, keys);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| s.id != id);
    }
}

/// Register the supervisor's preference defaults on a store.
pub fn register_server_prefs(store: &LocalPrefStore) {
    store.register_default(CDP_SERVER_PORT, Value::from(DEFAULT_CDP_PORT as i32));
    store.register_default(PROXY_PORT, Value::from(DEFAULT_PROXY_PORT as i32));
    store.register_default(SERVER_PORT, Value::from(0));
    store.register_default(EXTENSION_SERVER_PORT, Value::from(0));
    store.register_default(AGENT_SERVER_PORT, Value::from(0));
    store.register_default(ALLOW_REMOTE_IN_MCP, Value::from(false));
    store.register_default(RESTART_SERVER_REQUESTED, Value::from(false));
    store.register_default(SERVER_VERSION, Value::from(""));

    // Deprecated prefs: registered so migration reads see a typed default.
    store.register_default(DEPRECATED_MCP_SERVER_PORT, Value::from(0));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registered_store() -> LocalPrefStore {
        let store = LocalPrefStore::in_memory();
        register_server_prefs(&store);
        store
    }

    #[test]
    fn test_defaults() {
        let store = registered_store();
        assert_eq!(store.get_integer(CDP_SERVER_PORT), DEFAULT_CDP_PORT as i32);
        assert_eq!(store.get_integer(PROXY_PORT), DEFAULT_PROXY_PORT as i32);
        assert_eq!(store.get_integer(SERVER_PORT), 0);
        assert!(!store.get_boolean(ALLOW_REMOTE_IN_MCP));
        assert_eq!(store.get_string(SERVER_VERSION), "");
    }

    #[test]
    fn test_set_and_get() {
        let store = registered_store();
        store.set_integer(SERVER_PORT, 9400);
        assert_eq!(store.get_integer(SERVER_PORT), 9400);

        store.set_boolean(ALLOW_REMOTE_IN_MCP, true);
        assert!(store.get_boolean(ALLOW_REMOTE_IN_MCP));
    }

    #[test]
    fn test_unregistered_key_ignored() {
        let store = registered_store();
        store.set_integer("browseros.server.unknown", 1);
        assert_eq!(store.get_integer("browseros.server.unknown"), 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local_state.json");

        {
            let store = LocalPrefStore::new(path.clone());
            register_server_prefs(&store);
            store.set_integer(PROXY_PORT, 9150);
            store.set_boolean(ALLOW_REMOTE_IN_MCP, true);
        }

        let store = LocalPrefStore::new(path);
        register_server_prefs(&store);
        assert_eq!(store.get_integer(PROXY_PORT), 9150);
        assert!(store.get_boolean(ALLOW_REMOTE_IN_MCP));
        // Untouched keys still resolve to defaults.
        assert_eq!(store.get_integer(CDP_SERVER_PORT), DEFAULT_CDP_PORT as i32);
    }

    #[tokio::test]
    async fn test_observer_notified_on_change_only() {
        let store = registered_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = store.subscribe(&[RESTART_SERVER_REQUESTED], tx);

        // Same-value write: no notification.
        store.set_boolean(RESTART_SERVER_REQUESTED, false);
        assert!(rx.try_recv().is_err());

        store.set_boolean(RESTART_SERVER_REQUESTED, true);
        assert_eq!(rx.recv().await.unwrap(), RESTART_SERVER_REQUESTED);

        // Changes to other keys are not delivered.
        store.set_integer(SERVER_PORT, 1234);
        assert!(rx.try_recv().is_err());

        store.unsubscribe(id);
        store.set_boolean(RESTART_SERVER_REQUESTED, false);
        assert!(rx.try_recv().is_err());
    }
}
