//! # Listener Dispatch
//!
//! Listener tables keyed by order action or packet type, and the fan-out used when an
//! order or packet arrives.
//!
//! Dispatch works on a snapshot of the listener list taken when the event arrives, so
//! a listener that registers more listeners does not affect the event in flight. All
//! listeners of one event run concurrently, each behind its own fault boundary; the
//! delivery completes once every listener has finished.

use crate::fault::run_guarded;
use crate::protocol::Packet;
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, error};

/// Order listener, invoked with `(payload, action)`
pub type OrderListener =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Packet listener, invoked with the decoded packet
pub type PacketListener =
    Arc<dyn Fn(Packet) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Order message body on the order exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrderMessage {
    #[serde(default, alias = "order")]
    pub action: Option<String>,

    #[serde(default, alias = "message")]
    pub payload: Option<String>,
}

impl OrderMessage {
    pub fn new(action: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            payload: Some(payload.into()),
        }
    }

    /// The action, if present and non-empty
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref().filter(|action| !action.is_empty())
    }
}

/// Ordered listener lists per key
pub struct ListenerTable<K, L> {
    listeners: RwLock<HashMap<K, Vec<L>>>,
}

impl<K, L> Default for ListenerTable<K, L> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, L: Clone> ListenerTable<K, L> {
    pub fn add(&self, key: K, listener: L) {
        self.listeners.write().entry(key).or_default().push(listener);
    }

    pub fn snapshot<Q>(&self, key: &Q) -> Vec<L>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.listeners.read().get(key).cloned().unwrap_or_default()
    }

    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.listeners.read().get(key).map_or(0, Vec::len)
    }
}

/// Run every listener for one order; faults are logged and do not stop the others
pub async fn dispatch_order(listeners: Vec<OrderListener>, action: &str, payload: &str) {
    if listeners.is_empty() {
        debug!(action = %action, "No listeners for order");
        return;
    }

    let runs = listeners.into_iter().map(|listener| {
        let invocation = listener(payload.to_string(), action.to_string());
        async move { run_guarded("order listener", invocation).await }
    });

    for result in join_all(runs).await {
        if let Err(fault) = result {
            error!(action = %action, error = %fault, "An error was raised while consuming an order");
        }
    }
}

/// Run every listener for one packet; faults are logged and do not stop the others
pub async fn dispatch_packet(listeners: Vec<PacketListener>, packet: Packet) {
    let packet_type = packet.packet_type();
    if listeners.is_empty() {
        debug!(packet_type = %packet_type, "No listeners for packet");
        return;
    }

    let runs = listeners.into_iter().map(|listener| {
        let invocation = listener(packet.clone());
        async move { run_guarded("packet listener", invocation).await }
    });

    for result in join_all(runs).await {
        if let Err(fault) = result {
            error!(
                packet_type = %packet_type,
                error = %fault,
                "An error was raised while executing a packet listener"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str, fail: bool) -> OrderListener {
        let log = Arc::clone(log);
        Arc::new(move |payload, action| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}:{action}:{payload}"));
                if fail {
                    anyhow::bail!("{name} failed");
                }
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_order_message_wire_shape() {
        let message = OrderMessage::new("crawl", "https://example.org");
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"action":"crawl","payload":"https://example.org"}"#
        );

        let legacy: OrderMessage =
            serde_json::from_str(r#"{"order":"crawl","message":"x"}"#).unwrap();
        assert_eq!(legacy.action(), Some("crawl"));

        let empty: OrderMessage = serde_json::from_str(r#"{"action":"","payload":"x"}"#).unwrap();
        assert_eq!(empty.action(), None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let table: ListenerTable<String, u32> = ListenerTable::default();
        table.add("crawl".to_string(), 1);
        let snapshot = table.snapshot("crawl");
        table.add("crawl".to_string(), 2);

        assert_eq!(snapshot, vec![1]);
        assert_eq!(table.count("crawl"), 2);
        assert_eq!(table.count("other"), 0);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let listeners = vec![
            recording(&log, "first", true),
            recording(&log, "second", false),
        ];

        dispatch_order(listeners, "crawl", "page").await;

        let mut entries = log.lock().clone();
        entries.sort();
        assert_eq!(entries, vec!["first:crawl:page", "second:crawl:page"]);
    }
}
