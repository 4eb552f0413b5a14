//! # In-Memory Transport
//!
//! A `BrokerClient` backed by process-local queues with direct-exchange routing.
//!
//! Several clients can share one [`InMemoryBroker`], which is how tests run several
//! bots, or a bot and a fake director, against the same topology. Each subscription
//! gets its own consumer task that takes one message at a time from the queue and
//! settles it before asking for the next, mirroring a prefetch-one AMQP consumer.
//! Subscriptions on the same queue compete for messages.

use super::retry::{connect_with_retry, RetryPolicy};
use super::{BrokerClient, BrokerConnector, MessageHandler};
use crate::error::{BoticaError, BoticaResult};
use crate::fault::run_guarded;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A message as it was handed to `publish`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

struct QueueState {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    acked: usize,
    rejected: usize,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            acked: 0,
            rejected: 0,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    online: AtomicBool,
    queues: Mutex<HashMap<String, QueueState>>,
    bindings: Mutex<HashMap<(String, String), Vec<String>>>,
    published: Mutex<Vec<PublishedMessage>>,
    activity: Notify,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
}

/// Shared process-local broker
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("online", &self.state.online.load(Ordering::SeqCst))
            .field("queues", &self.state.queues.lock().len())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let state = BrokerState::default();
        state.online.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Open a new client connection to this broker
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            broker: self.clone(),
            connected: AtomicBool::new(true),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Connector producing clients of this broker, with the given retry policy
    pub fn connector(&self, retry_policy: RetryPolicy) -> InMemoryConnector {
        InMemoryConnector {
            broker: self.clone(),
            retry_policy,
        }
    }

    /// Make the next `failures` connection attempts fail
    pub fn fail_next_connects(&self, failures: u32) {
        self.state.connect_failures.store(failures, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Drop every client connection, as if the broker went away
    pub fn disconnect(&self) {
        self.state.online.store(false, Ordering::SeqCst);
        self.state.activity.notify_waiters();
    }

    pub fn is_online(&self) -> bool {
        self.state.online.load(Ordering::SeqCst)
    }

    /// Declare a queue; existing queues are left untouched
    pub fn declare_queue(&self, queue: &str) {
        self.state
            .queues
            .lock()
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.queues.lock().contains_key(queue)
    }

    /// Route `exchange`/`routing_key` into `queue`; duplicate bindings are ignored
    pub fn declare_binding(&self, exchange: &str, routing_key: &str, queue: &str) {
        let mut bindings = self.state.bindings.lock();
        let queues = bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !queues.iter().any(|q| q == queue) {
            queues.push(queue.to_string());
        }
    }

    pub fn is_bound(&self, exchange: &str, routing_key: &str, queue: &str) -> bool {
        self.state
            .bindings
            .lock()
            .get(&(exchange.to_string(), routing_key.to_string()))
            .is_some_and(|queues| queues.iter().any(|q| q == queue))
    }

    /// Route a message through the exchange to every bound queue
    pub fn route(&self, exchange: &str, routing_key: &str, payload: Vec<u8>) {
        self.state.published.lock().push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.clone(),
        });

        let targets = self
            .state
            .bindings
            .lock()
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(exchange = %exchange, routing_key = %routing_key, "Message unroutable, dropped");
        }

        let queues = self.state.queues.lock();
        for target in targets {
            if let Some(queue) = queues.get(&target) {
                // The receiver lives as long as the queue, so sending cannot fail
                let _ = queue.sender.send(payload.clone());
            }
        }
        drop(queues);

        self.state.activity.notify_waiters();
    }

    /// Every message published to `exchange` under `routing_key`, in publish order
    pub fn published_to(&self, exchange: &str, routing_key: &str) -> Vec<Vec<u8>> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|m| m.exchange == exchange && m.routing_key == routing_key)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().clone()
    }

    pub fn acked(&self, queue: &str) -> usize {
        self.state.queues.lock().get(queue).map_or(0, |q| q.acked)
    }

    pub fn rejected(&self, queue: &str) -> usize {
        self.state.queues.lock().get(queue).map_or(0, |q| q.rejected)
    }

    /// Wait until `queue` has settled (acked or rejected) at least `count` messages
    pub async fn wait_for_settled(&self, queue: &str, count: usize) {
        self.wait_until(|broker| broker.acked(queue) + broker.rejected(queue) >= count)
            .await;
    }

    /// Wait until at least `count` messages were published under `exchange`/`routing_key`
    pub async fn wait_for_published(&self, exchange: &str, routing_key: &str, count: usize) {
        self.wait_until(|broker| broker.published_to(exchange, routing_key).len() >= count)
            .await;
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.state.activity.notified();
            if condition(self) {
                return;
            }
            notified.await;
        }
    }

    fn record_settlement(&self, queue: &str, acked: bool) {
        if let Some(state) = self.state.queues.lock().get_mut(queue) {
            if acked {
                state.acked += 1;
            } else {
                state.rejected += 1;
            }
        }
        self.state.activity.notify_waiters();
    }

    fn receiver(
        &self,
        queue: &str,
    ) -> Option<Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>> {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(|q| Arc::clone(&q.receiver))
    }
}

/// One connection to an [`InMemoryBroker`]
pub struct InMemoryClient {
    broker: InMemoryBroker,
    connected: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryClient")
            .field("connected", &self.is_connected())
            .field("consumers", &self.consumers.lock().len())
            .finish()
    }
}

impl InMemoryClient {
    fn ensure_connected(&self) -> BoticaResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BoticaError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn create_queue(&self, queue: &str) -> BoticaResult<()> {
        self.ensure_connected()?;
        self.broker.declare_queue(queue);
        Ok(())
    }

    async fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> BoticaResult<()> {
        self.ensure_connected()?;
        if !self.broker.has_queue(queue) {
            return Err(BoticaError::broker(
                format!("queue_bind {queue}"),
                "NOT_FOUND - no queue",
            ));
        }
        self.broker.declare_binding(exchange, routing_key, queue);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> BoticaResult<()> {
        self.ensure_connected()?;
        self.broker.route(exchange, routing_key, payload);
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: MessageHandler) -> BoticaResult<()> {
        self.ensure_connected()?;
        let receiver = self.broker.receiver(queue).ok_or_else(|| {
            BoticaError::broker(format!("basic_consume {queue}"), "NOT_FOUND - no queue")
        })?;

        let broker = self.broker.clone();
        let queue_name = queue.to_string();
        let task = tokio::spawn(async move {
            let context = format!("delivery on {queue_name}");
            loop {
                // Holding the receiver lock only while waiting lets competing consumers
                // take turns without ever running two deliveries of one consumer at once.
                let next = receiver.lock().await.recv().await;
                let Some(body) = next else {
                    break;
                };

                match run_guarded(&context, handler(body)).await {
                    Ok(()) => broker.record_settlement(&queue_name, true),
                    Err(fault) => {
                        warn!(queue = %queue_name, error = %fault, "Rejecting message");
                        broker.record_settlement(&queue_name, false);
                    }
                }
            }
        });

        self.consumers.lock().push(task);
        debug!(queue = %queue, "Subscribed to in-memory queue");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.broker.is_online()
    }

    async fn close(&self) -> BoticaResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        for consumer in self.consumers.lock().drain(..) {
            consumer.abort();
        }
        Ok(())
    }
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        for consumer in self.consumers.get_mut().drain(..) {
            consumer.abort();
        }
    }
}

/// Connector over an [`InMemoryBroker`] honoring scripted connection failures
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    broker: InMemoryBroker,
    retry_policy: RetryPolicy,
}

impl InMemoryConnector {
    /// Connector that gives up after the first failed attempt
    pub fn immediate(broker: &InMemoryBroker) -> Self {
        broker.connector(RetryPolicy::new(1, Duration::ZERO))
    }
}

#[async_trait]
impl BrokerConnector for InMemoryConnector {
    async fn connect(&self) -> BoticaResult<Arc<dyn BrokerClient>> {
        let broker = self.broker.clone();
        let client = connect_with_retry(&self.retry_policy, "in-memory", move |_| {
            let broker = broker.clone();
            async move {
                broker.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
                let scripted_failure = broker
                    .state
                    .connect_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if scripted_failure || !broker.is_online() {
                    return Err(BoticaError::broker("connect", "connection refused"));
                }
                Ok(broker.client())
            }
        })
        .await?;

        Ok(Arc::new(client))
    }
}
