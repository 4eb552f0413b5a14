//! # Botica Client
//!
//! Facade a bot uses to talk to the rest of the environment: order listeners and
//! publishing on the order exchange, control packets and correlated queries on the
//! protocol exchange.
//!
//! ## Topology installed by `connect`
//!
//! ```text
//! botica.protocol --bot.<id>.protocol--> [bot.<id>.protocol]        -> packet listeners
//! botica.order    (director bindings)--> [bot_type.<type>.orders.*] -> order listeners
//! botica.order    --bot.<id>.orders----> [bot.<id>.orders]          -> order listeners
//! ```
//!
//! Outbound packets are wrapped in a `BotPacket` envelope carrying the bot id and
//! published to the protocol exchange under `director.protocol`.

pub mod dispatch;
pub mod topology;

pub use dispatch::{OrderListener, OrderMessage, PacketListener};

use crate::broker::{BrokerClient, BrokerConnector, MessageHandler};
use crate::config::BotTypeConfiguration;
use crate::constants::protocol::DEFAULT_QUERY_TIMEOUT;
use crate::constants::topology::{DIRECTOR_PROTOCOL, ORDER_EXCHANGE, PROTOCOL_EXCHANGE};
use crate::error::{BoticaError, BoticaResult};
use crate::protocol::{
    BotPacket, Packet, PacketRegistry, PacketType, QueryHandler, RequestPacket, ResponsePacket,
    TypedPacket,
};
use dispatch::ListenerTable;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables of a [`BoticaClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub registry: Arc<PacketRegistry>,
    pub query_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            registry: Arc::new(PacketRegistry::standard()),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Cloneable handle to one bot's broker session and listener tables
#[derive(Clone)]
pub struct BoticaClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    bot_type: BotTypeConfiguration,
    bot_id: String,
    connector: Arc<dyn BrokerConnector>,
    broker: RwLock<Option<Arc<dyn BrokerClient>>>,
    transition: tokio::sync::Mutex<()>,
    registry: Arc<PacketRegistry>,
    queries: QueryHandler,
    order_listeners: ListenerTable<String, OrderListener>,
    packet_listeners: ListenerTable<PacketType, PacketListener>,
    correlated_types: Mutex<HashSet<PacketType>>,
    query_timeout: Duration,
}

impl fmt::Debug for BoticaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoticaClient")
            .field("bot_type", &self.inner.bot_type.id)
            .field("bot_id", &self.inner.bot_id)
            .field("connected", &self.is_connected())
            .field("pending_queries", &self.inner.queries.pending_count())
            .finish()
    }
}

impl BoticaClient {
    pub fn new(
        bot_type: BotTypeConfiguration,
        bot_id: impl Into<String>,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self::with_options(bot_type, bot_id, connector, ClientOptions::default())
    }

    pub fn with_options(
        bot_type: BotTypeConfiguration,
        bot_id: impl Into<String>,
        connector: Arc<dyn BrokerConnector>,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                bot_type,
                bot_id: bot_id.into(),
                connector,
                broker: RwLock::new(None),
                transition: tokio::sync::Mutex::new(()),
                registry: options.registry,
                queries: QueryHandler::new(),
                order_listeners: ListenerTable::default(),
                packet_listeners: ListenerTable::default(),
                correlated_types: Mutex::new(HashSet::new()),
                query_timeout: options.query_timeout,
            }),
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.inner.bot_id
    }

    pub fn bot_type(&self) -> &BotTypeConfiguration {
        &self.inner.bot_type
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.inner.registry
    }

    pub fn query_handler(&self) -> &QueryHandler {
        &self.inner.queries
    }

    /// Connect to the broker and install the protocol and order subscriptions
    pub async fn connect(&self) -> BoticaResult<()> {
        let _transition = self.inner.transition.lock().await;
        if self.is_connected() {
            return Err(BoticaError::AlreadyConnected);
        }

        let broker = self.inner.connector.connect().await?;
        *self.inner.broker.write() = Some(Arc::clone(&broker));

        if let Err(error) = self.install_topology(broker.as_ref()).await {
            warn!(bot_id = %self.inner.bot_id, error = %error, "Topology setup failed, closing connection");
            self.inner.broker.write().take();
            if let Err(close_error) = broker.close().await {
                debug!(error = %close_error, "Ignoring close failure after setup error");
            }
            return Err(error);
        }

        info!(bot_id = %self.inner.bot_id, bot_type = %self.inner.bot_type.id, "Botica client connected");
        Ok(())
    }

    async fn install_topology(&self, broker: &dyn BrokerClient) -> BoticaResult<()> {
        let protocol_queue = topology::bot_protocol_queue(&self.inner.bot_id);
        broker.create_queue(&protocol_queue).await?;
        broker
            .bind(PROTOCOL_EXCHANGE, &protocol_queue, &protocol_queue)
            .await?;
        broker
            .subscribe(&protocol_queue, self.packet_handler())
            .await?;

        // bot_type queues are created and bound by the director
        for strategy in self.inner.bot_type.subscription_strategies() {
            let queue = topology::bot_type_orders_queue(&self.inner.bot_type.id, strategy);
            debug!(queue = %queue, "Listening to orders");
            broker.subscribe(&queue, self.order_handler(queue.clone())).await?;
        }

        let own_queue = topology::bot_orders_queue(&self.inner.bot_id);
        broker.create_queue(&own_queue).await?;
        broker.bind(ORDER_EXCHANGE, &own_queue, &own_queue).await?;
        debug!(queue = %own_queue, "Listening to orders");
        broker
            .subscribe(&own_queue, self.order_handler(own_queue.clone()))
            .await?;

        Ok(())
    }

    fn packet_handler(&self) -> MessageHandler {
        let client = Arc::downgrade(&self.inner);
        Arc::new(move |body: Vec<u8>| {
            let client = Weak::clone(&client);
            async move {
                let Some(client) = client.upgrade() else {
                    return Ok(());
                };
                let packet = client.registry.deserialize(&body)?;
                debug!(packet_type = %packet.packet_type(), "Incoming packet");
                let listeners = client.packet_listeners.snapshot(&packet.packet_type());
                dispatch::dispatch_packet(listeners, packet).await;
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    fn order_handler(&self, queue: String) -> MessageHandler {
        let client = Arc::downgrade(&self.inner);
        Arc::new(move |body: Vec<u8>| {
            let client = Weak::clone(&client);
            let queue = queue.clone();
            async move {
                let Some(client) = client.upgrade() else {
                    return Ok(());
                };
                debug!(queue = %queue, body = %String::from_utf8_lossy(&body), "Incoming order");
                let message: OrderMessage = serde_json::from_slice(&body)
                    .map_err(|e| anyhow::anyhow!("failed to parse incoming order from {queue}: {e}"))?;

                let Some(action) = message.action() else {
                    debug!(queue = %queue, "Dropping order without action");
                    return Ok(());
                };
                let payload = message.payload.as_deref().unwrap_or_default();
                let listeners = client.order_listeners.snapshot(action);
                dispatch::dispatch_order(listeners, action, payload).await;
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        })
    }

    /// Live connection state
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Register a listener for orders with the given action, called with `(payload, action)`
    pub fn register_order_listener<F, Fut>(&self, action: impl Into<String>, listener: F)
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action = action.into();
        debug!(action = %action, "New order listener");
        let listener: OrderListener =
            Arc::new(move |payload, action| listener(payload, action).boxed());
        self.inner.order_listeners.add(action, listener);
    }

    pub fn order_listener_count(&self, action: &str) -> usize {
        self.inner.order_listeners.count(action)
    }

    /// Publish an order to the order exchange
    pub async fn publish_order(&self, key: &str, action: &str, payload: &str) -> BoticaResult<()> {
        let broker = self.inner.connected_broker()?;
        let contents = serde_json::to_vec(&OrderMessage::new(action, payload))?;
        debug!(key = %key, action = %action, "Publishing order");
        broker.publish(ORDER_EXCHANGE, key, contents).await
    }

    /// Register a typed listener for inbound packets of type `P`
    pub fn register_packet_listener<P, F, Fut>(&self, listener: F)
    where
        P: TypedPacket,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.ensure_response_listener(P::PACKET_TYPE);
        let listener: PacketListener = Arc::new(move |packet| match P::try_from(packet) {
            Ok(packet) => listener(packet).boxed(),
            Err(error) => futures::future::ready(Err(anyhow::Error::from(error))).boxed(),
        });
        self.inner.packet_listeners.add(P::PACKET_TYPE, listener);
    }

    /// Answer inbound requests of type `R`; the response is sent back with the request's id
    pub fn register_query_listener<R, F, Fut>(&self, handler: F)
    where
        R: RequestPacket,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R::Response>> + Send + 'static,
    {
        let client = Arc::downgrade(&self.inner);
        let handler = Arc::new(handler);
        self.register_packet_listener::<R, _, _>(move |request: R| {
            let client = Weak::clone(&client);
            let handler = Arc::clone(&handler);
            async move {
                let request_id = request
                    .request_id()
                    .map(str::to_owned)
                    .ok_or_else(|| BoticaError::missing_correlation_id(R::PACKET_TYPE.tag()))?;

                let mut response = handler(request).await?;
                ResponsePacket::set_request_id(&mut response, request_id);

                if let Some(client) = client.upgrade() {
                    client.send_packet(response.into()).await?;
                }
                Ok::<(), anyhow::Error>(())
            }
        });
    }

    pub fn packet_listener_count(&self, packet_type: PacketType) -> usize {
        self.inner.packet_listeners.count(&packet_type)
    }

    /// Send a control packet to the director
    pub async fn send_packet(&self, packet: impl Into<Packet>) -> BoticaResult<()> {
        self.inner.send_packet(packet.into()).await
    }

    /// Send a request and wait for its response with the default timeout
    pub async fn send_query<R, F, T>(
        &self,
        request: R,
        on_response: F,
        on_timeout: T,
    ) -> BoticaResult<String>
    where
        R: RequestPacket,
        F: FnOnce(R::Response) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.send_query_with_timeout(request, on_response, on_timeout, self.inner.query_timeout)
            .await
    }

    /// Send a request; exactly one of `on_response` and `on_timeout` is called later
    pub async fn send_query_with_timeout<R, F, T>(
        &self,
        mut request: R,
        on_response: F,
        on_timeout: T,
        timeout: Duration,
    ) -> BoticaResult<String>
    where
        R: RequestPacket,
        F: FnOnce(R::Response) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        self.inner.connected_broker()?;
        self.inner
            .ensure_response_listener(<R::Response as TypedPacket>::PACKET_TYPE);

        let request_id =
            self.inner
                .queries
                .register_query(&mut request, on_response, on_timeout, timeout);

        if let Err(error) = self.inner.send_packet(request.into()).await {
            self.inner.queries.cancel(&request_id);
            return Err(error);
        }
        Ok(request_id)
    }

    /// Close the broker connection
    pub async fn close(&self) -> BoticaResult<()> {
        let _transition = self.inner.transition.lock().await;
        if !self.is_connected() {
            return Err(BoticaError::NotConnected);
        }

        let broker = self.inner.broker.write().take();
        match broker {
            Some(broker) => {
                broker.close().await?;
                info!(bot_id = %self.inner.bot_id, "Botica client disconnected");
                Ok(())
            }
            None => Err(BoticaError::NotConnected),
        }
    }
}

impl ClientInner {
    fn is_connected(&self) -> bool {
        self.broker
            .read()
            .as_ref()
            .is_some_and(|broker| broker.is_connected())
    }

    fn connected_broker(&self) -> BoticaResult<Arc<dyn BrokerClient>> {
        match self.broker.read().as_ref() {
            Some(broker) if broker.is_connected() => Ok(Arc::clone(broker)),
            _ => Err(BoticaError::NotConnected),
        }
    }

    async fn send_packet(&self, packet: Packet) -> BoticaResult<()> {
        let broker = self.connected_broker()?;
        let packet_type = packet.packet_type();
        let envelope = Packet::Bot(BotPacket::new(self.bot_id.clone(), packet));
        let contents = self.registry.serialize(&envelope)?;
        debug!(packet_type = %packet_type, "Sending packet to director");
        broker
            .publish(PROTOCOL_EXCHANGE, DIRECTOR_PROTOCOL, contents)
            .await
    }

    /// Feed responses of `packet_type` into the query handler, installed at most once
    fn ensure_response_listener(&self, packet_type: PacketType) {
        if !packet_type.is_response() || !self.correlated_types.lock().insert(packet_type) {
            return;
        }

        let queries = self.queries.clone();
        let listener: PacketListener = Arc::new(move |packet| {
            let accepted = queries.accept_response(packet);
            async move { accepted.map_err(anyhow::Error::from) }.boxed()
        });
        self.packet_listeners.add(packet_type, listener);
    }
}
