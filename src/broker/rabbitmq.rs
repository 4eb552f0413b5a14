//! # RabbitMQ Transport
//!
//! `BrokerClient` implementation over AMQP 0.9.1 using the `lapin` crate.
//!
//! | Operation | AMQP |
//! |-----------|------|
//! | `create_queue` | `queue.declare` (non-durable) |
//! | `bind` | `queue.bind` |
//! | `publish` | `basic.publish` on the shared channel |
//! | `subscribe` | dedicated channel, `basic.qos(1)`, `basic.consume`, `ack` / `reject(requeue=false)` |
//!
//! Exchanges are declared by the director; bots only bind to them.

use super::retry::{connect_with_retry, RetryPolicy};
use super::{BrokerClient, BrokerConnector, MessageHandler};
use crate::config::RabbitMqConfiguration;
use crate::constants::broker::SUBSCRIPTION_PREFETCH;
use crate::error::{BoticaError, BoticaResult};
use crate::fault::run_guarded;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connects to RabbitMQ with the configured retry policy
#[derive(Clone)]
pub struct RabbitMqConnector {
    username: String,
    password: String,
    host: String,
    port: u16,
    retry_policy: RetryPolicy,
    connection_name: String,
}

impl RabbitMqConnector {
    /// Build a connector from the broker section; its port overrides `default_port`
    pub fn new(
        config: &RabbitMqConfiguration,
        host: impl Into<String>,
        default_port: u16,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            host: host.into(),
            port: config.port.unwrap_or(default_port),
            retry_policy,
            connection_name: "botica-bot".to_string(),
        }
    }

    /// Name reported to the broker for this connection
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

impl fmt::Debug for RabbitMqConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMqConnector")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn connect(&self) -> BoticaResult<Arc<dyn BrokerClient>> {
        let uri = self.uri();
        let target = format!("{}:{}", self.host, self.port);

        let client = connect_with_retry(&self.retry_policy, &target, |_| {
            RabbitMqClient::connect(&uri, &self.connection_name)
        })
        .await?;

        Ok(Arc::new(client))
    }
}

/// A live AMQP connection with one channel for provisioning and publishing
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    connected: Arc<AtomicBool>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for RabbitMqClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMqClient")
            .field("connected", &self.is_connected())
            .field("consumers", &self.consumers.lock().len())
            .finish()
    }
}

impl RabbitMqClient {
    /// Single connection attempt
    pub async fn connect(uri: &str, connection_name: &str) -> BoticaResult<Self> {
        let connection = Connection::connect(
            uri,
            ConnectionProperties::default().with_connection_name(connection_name.into()),
        )
        .await
        .map_err(|e| BoticaError::broker("connect", e.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);
        connection.on_error(move |error| {
            error!(error = %error, "Message broker connection lost");
            flag.store(false, Ordering::SeqCst);
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BoticaError::broker("create_channel", e.to_string()))?;

        Ok(Self {
            connection,
            channel,
            connected,
            consumers: Mutex::new(Vec::new()),
        })
    }

    fn ensure_connected(&self) -> BoticaResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BoticaError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerClient for RabbitMqClient {
    async fn create_queue(&self, queue: &str) -> BoticaResult<()> {
        self.ensure_connected()?;
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BoticaError::broker(format!("queue_declare {queue}"), e.to_string()))?;
        debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> BoticaResult<()> {
        self.ensure_connected()?;
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BoticaError::broker(format!("queue_bind {queue}"), e.to_string()))?;
        debug!(queue = %queue, exchange = %exchange, routing_key = %routing_key, "Queue bound");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> BoticaResult<()> {
        self.ensure_connected()?;
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BoticaError::broker(format!("publish {exchange}/{routing_key}"), e.to_string()))?;

        // Publisher confirms are not enabled, so this resolves immediately
        confirm
            .await
            .map_err(|e| BoticaError::broker(format!("publish {exchange}/{routing_key}"), e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str, handler: MessageHandler) -> BoticaResult<()> {
        self.ensure_connected()?;

        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BoticaError::broker("create_channel", e.to_string()))?;

        channel
            .basic_qos(SUBSCRIPTION_PREFETCH, BasicQosOptions::default())
            .await
            .map_err(|e| BoticaError::broker(format!("basic_qos {queue}"), e.to_string()))?;

        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BoticaError::broker(format!("basic_consume {queue}"), e.to_string()))?;

        let queue_name = queue.to_string();
        let task = tokio::spawn(async move {
            // Keeps the consumer channel open for as long as the loop runs
            let _channel = channel;
            let context = format!("delivery on {queue_name}");

            while let Some(delivery) = consumer.next().await {
                let mut delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(error) => {
                        warn!(queue = %queue_name, error = %error, "Consumer stream failed");
                        break;
                    }
                };

                let body = std::mem::take(&mut delivery.data);
                let settled = match run_guarded(&context, handler(body)).await {
                    Ok(()) => delivery.ack(BasicAckOptions::default()).await,
                    Err(fault) => {
                        warn!(queue = %queue_name, error = %fault, "Rejecting message");
                        delivery
                            .reject(BasicRejectOptions { requeue: false })
                            .await
                    }
                };

                if let Err(error) = settled {
                    warn!(queue = %queue_name, error = %error, "Failed to settle message");
                }
            }

            debug!(queue = %queue_name, "Consumer stopped");
        });

        self.consumers.lock().push(task);
        info!(queue = %queue, "Subscribed to queue");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.connection.status().connected()
    }

    async fn close(&self) -> BoticaResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let result = self
            .connection
            .close(200, "OK")
            .await
            .map_err(|e| BoticaError::broker("close", e.to_string()));

        for consumer in self.consumers.lock().drain(..) {
            consumer.abort();
        }

        result
    }
}
