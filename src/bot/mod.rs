//! # Bot Lifecycle
//!
//! A bot instance in a Botica environment: `Idle → Running → Stopped`.
//!
//! `start()` connects the client, arms the proactive scheduler when the lifecycle is
//! proactive, answers the director's heartbeats, and announces readiness. `stop()`
//! cancels the scheduler and closes the connection. `Stopped` is terminal; build a new
//! bot to run again.
//!
//! ```rust,no_run
//! # async fn example() -> botica::BoticaResult<()> {
//! let bot = botica::bootstrap::botica().await?;
//! bot.on_default_order(|payload, _action| async move {
//!     tracing::info!(%payload, "Received order");
//!     Ok(())
//! })?;
//! bot.start().await?;
//! # Ok(())
//! # }
//! ```

mod scheduler;
pub mod shutdown;

pub use shutdown::{ShutdownHandler, ShutdownHook, ShutdownRequest, ShutdownResponse};

use crate::broker::BrokerConnector;
use crate::client::{BoticaClient, ClientOptions};
use crate::config::{
    effective_lifecycle, BotInstanceConfiguration, BotTypeConfiguration, LifecycleConfiguration,
};
use crate::constants::{CONTAINER_PREFIX, SHARED_DIRECTORY};
use crate::error::{BoticaError, BoticaResult};
use crate::protocol::{HeartbeatPacket, ReadyPacket};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use scheduler::ProactiveScheduler;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of a bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotState::Idle => write!(f, "idle"),
            BotState::Running => write!(f, "running"),
            BotState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Task run by the proactive scheduler
pub type ProactiveTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Cloneable handle to one bot instance
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

pub(crate) struct BotInner {
    client: BoticaClient,
    bot_type: BotTypeConfiguration,
    instance: BotInstanceConfiguration,
    lifecycle: LifecycleConfiguration,
    shutdown_handler: ShutdownHandler,
    state: RwLock<BotState>,
    transition: tokio::sync::Mutex<()>,
    proactive_task: RwLock<Option<ProactiveTask>>,
    scheduler: Mutex<Option<ProactiveScheduler>>,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("bot_type", &self.inner.bot_type.id)
            .field("bot_id", &self.inner.instance.id)
            .field("state", &self.state())
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

impl Bot {
    /// Create an idle bot around an existing client
    pub fn new(
        client: BoticaClient,
        bot_type: BotTypeConfiguration,
        instance: BotInstanceConfiguration,
    ) -> Self {
        let lifecycle = effective_lifecycle(&bot_type, &instance);
        let shutdown_handler = ShutdownHandler::new(&client);
        Self {
            inner: Arc::new(BotInner {
                client,
                bot_type,
                instance,
                lifecycle,
                shutdown_handler,
                state: RwLock::new(BotState::Idle),
                transition: tokio::sync::Mutex::new(()),
                proactive_task: RwLock::new(None),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Create an idle bot with a fresh client using `connector`
    pub fn with_connector(
        bot_type: BotTypeConfiguration,
        instance: BotInstanceConfiguration,
        connector: Arc<dyn BrokerConnector>,
        options: ClientOptions,
    ) -> Self {
        let client =
            BoticaClient::with_options(bot_type.clone(), instance.id.clone(), connector, options);
        Self::new(client, bot_type, instance)
    }

    pub(crate) fn from_inner(inner: Arc<BotInner>) -> Self {
        Self { inner }
    }

    pub fn state(&self) -> BotState {
        *self.inner.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BotState::Running
    }

    pub fn client(&self) -> &BoticaClient {
        &self.inner.client
    }

    pub fn shutdown_handler(&self) -> &ShutdownHandler {
        &self.inner.shutdown_handler
    }

    pub fn lifecycle_configuration(&self) -> &LifecycleConfiguration {
        &self.inner.lifecycle
    }

    pub fn bot_type(&self) -> &BotTypeConfiguration {
        &self.inner.bot_type
    }

    pub fn instance(&self) -> &BotInstanceConfiguration {
        &self.inner.instance
    }

    /// Hostname of this bot's container
    pub fn hostname(&self) -> String {
        Self::bot_hostname(&self.inner.instance.id)
    }

    /// Hostname of another bot's container
    pub fn bot_hostname(bot_id: &str) -> String {
        format!("{CONTAINER_PREFIX}{bot_id}")
    }

    /// Directory shared by every bot container of the environment
    pub fn shared_directory() -> &'static str {
        SHARED_DIRECTORY
    }

    /// Set the task run by the proactive scheduler
    ///
    /// Fails with `NotProactive` unless the lifecycle is proactive, and with
    /// `AlreadyRunning` once the bot has started.
    pub fn proactive<F, Fut>(&self, task: F) -> BoticaResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task: ProactiveTask = Arc::new(move || task().boxed());
        self.set_proactive_task(task)
    }

    pub fn set_proactive_task(&self, task: ProactiveTask) -> BoticaResult<()> {
        if !self.inner.lifecycle.is_proactive() {
            return Err(BoticaError::NotProactive);
        }
        match self.state() {
            BotState::Running => return Err(BoticaError::AlreadyRunning),
            BotState::Stopped => return Err(BoticaError::BotStopped),
            BotState::Idle => {}
        }
        *self.inner.proactive_task.write() = Some(task);
        Ok(())
    }

    /// Listen to orders with `action`, called with `(payload, action)`
    pub fn on_order<F, Fut>(&self, action: impl Into<String>, listener: F)
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.client.register_order_listener(action, listener);
    }

    /// Listen to the default action of the reactive lifecycle
    pub fn on_default_order<F, Fut>(&self, listener: F) -> BoticaResult<()>
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action = self
            .inner
            .lifecycle
            .default_action()
            .ok_or(BoticaError::NoDefaultAction)?
            .to_string();
        self.on_order(action, listener);
        Ok(())
    }

    /// Register a hook run when the director asks this bot to shut down
    pub fn on_shutdown_request<F, Fut>(&self, hook: F)
    where
        F: Fn(ShutdownRequest, ShutdownResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.shutdown_handler.on_shutdown_request(hook);
    }

    /// Publish `payload` to the bot type's default key and action
    pub async fn publish_order(&self, payload: &str) -> BoticaResult<()> {
        let (key, action) = self.default_publish_target()?;
        self.publish_order_to(&key, &action, payload).await
    }

    /// Publish `payload` under an explicit key and action
    pub async fn publish_order_to(&self, key: &str, action: &str, payload: &str) -> BoticaResult<()> {
        self.inner.client.publish_order(key, action, payload).await
    }

    /// Publish a JSON-encoded payload to the default key and action
    pub async fn publish_order_json<T: Serialize + ?Sized>(&self, payload: &T) -> BoticaResult<()> {
        let (key, action) = self.default_publish_target()?;
        self.publish_order_json_to(&key, &action, payload).await
    }

    pub async fn publish_order_json_to<T: Serialize + ?Sized>(
        &self,
        key: &str,
        action: &str,
        payload: &T,
    ) -> BoticaResult<()> {
        let payload = serde_json::to_string(payload)?;
        self.publish_order_to(key, action, &payload).await
    }

    fn default_publish_target(&self) -> BoticaResult<(String, String)> {
        self.inner
            .bot_type
            .publish
            .as_ref()
            .and_then(|publish| publish.default_target())
            .map(|(key, action)| (key.to_string(), action.to_string()))
            .ok_or(BoticaError::NoDefaultPublishTarget)
    }

    /// Connect and start the bot
    ///
    /// Fails with `AlreadyRunning` if running, `BotStopped` once stopped, and
    /// `MissingProactiveTask` before connecting if a proactive bot has no task.
    pub async fn start(&self) -> BoticaResult<()> {
        let _transition = self.inner.transition.lock().await;
        match self.state() {
            BotState::Running => return Err(BoticaError::AlreadyRunning),
            BotState::Stopped => return Err(BoticaError::BotStopped),
            BotState::Idle => {}
        }

        let proactive = match &self.inner.lifecycle {
            LifecycleConfiguration::Proactive(configuration) => {
                let task = self
                    .inner
                    .proactive_task
                    .read()
                    .clone()
                    .ok_or(BoticaError::MissingProactiveTask)?;
                Some((configuration.clone(), task))
            }
            LifecycleConfiguration::Reactive(_) => None,
        };

        info!(bot_id = %self.inner.instance.id, "Establishing connection with the message broker...");
        self.inner.client.connect().await?;
        *self.inner.state.write() = BotState::Running;
        info!(bot_id = %self.inner.instance.id, "Connected to the message broker");

        if let Some((configuration, task)) = proactive {
            let scheduler =
                ProactiveScheduler::start(Arc::downgrade(&self.inner), &configuration, task);
            *self.inner.scheduler.lock() = Some(scheduler);
        }

        self.setup_heartbeat();
        self.inner.client.send_packet(ReadyPacket {}).await?;
        info!(bot_id = %self.inner.instance.id, "Bot started");
        Ok(())
    }

    fn setup_heartbeat(&self) {
        let bot = Arc::downgrade(&self.inner);
        self.inner
            .client
            .register_packet_listener(move |_: HeartbeatPacket| {
                let bot = bot.clone();
                async move {
                    if let Some(bot) = bot.upgrade() {
                        bot.client.send_packet(HeartbeatPacket {}).await?;
                    }
                    Ok::<(), anyhow::Error>(())
                }
            });
    }

    /// Stop the bot; a no-op unless running
    ///
    /// In-flight listeners, tasks and pending queries are left to finish on their own.
    pub async fn stop(&self) {
        let _transition = self.inner.transition.lock().await;
        if self.state() != BotState::Running {
            debug!(state = %self.state(), "Stop requested while not running");
            return;
        }

        if let Some(scheduler) = self.inner.scheduler.lock().take() {
            scheduler.cancel();
        }

        info!(bot_id = %self.inner.instance.id, "Closing connection with the message broker...");
        if let Err(error) = self.inner.client.close().await {
            warn!(bot_id = %self.inner.instance.id, error = %error, "Failed to close broker connection");
        }

        *self.inner.state.write() = BotState::Stopped;
        info!(bot_id = %self.inner.instance.id, "Bot stopped");
    }
}
