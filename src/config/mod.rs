//! # Botica Configuration
//!
//! Typed model of the environment configuration file the director mounts into every
//! bot container, plus the runtime settings of the bot process itself.
//!
//! Field names follow the camelCase keys of the YAML file. Only the sections a bot
//! consumes are modeled; everything else in the file is ignored.
//!
//! ```yaml
//! broker:
//!   type: rabbitmq
//!   username: botica
//!   password: secret
//! bots:
//!   crawler:
//!     id: crawler
//!     lifecycle: { type: proactive, initialDelay: 5, period: 60 }
//!     publish: { key: analyzers, order: analyze }
//!     subscribe:
//!       - { key: crawlers, strategy: broadcast }
//!     instances:
//!       crawler-1: { id: crawler-1 }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

pub use error::ConfigurationError;
pub use loader::{load_configuration, RuntimeSettings};

/// Root of the environment configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainConfiguration {
    /// Message broker shared by the whole environment
    pub broker: BrokerConfiguration,

    /// Bot types keyed by type id
    #[serde(default)]
    pub bots: HashMap<String, BotTypeConfiguration>,
}

impl MainConfiguration {
    /// Look up a bot type by id
    pub fn bot_type(&self, bot_type: &str) -> Result<&BotTypeConfiguration, ConfigurationError> {
        self.bots
            .get(bot_type)
            .ok_or_else(|| ConfigurationError::UnknownBotType {
                bot_type: bot_type.to_string(),
            })
    }

    /// Resolve the type and instance configuration of one bot
    pub fn resolve_bot(
        &self,
        bot_type: &str,
        bot_id: &str,
    ) -> Result<(BotTypeConfiguration, BotInstanceConfiguration), ConfigurationError> {
        let type_configuration = self.bot_type(bot_type)?;
        let instance_configuration = type_configuration
            .instances
            .get(bot_id)
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownBotInstance {
                bot_type: bot_type.to_string(),
                bot_id: bot_id.to_string(),
            })?;

        Ok((type_configuration.clone(), instance_configuration))
    }

    /// Validate the sections consumed by the bot runtime
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match &self.broker {
            BrokerConfiguration::RabbitMq(rabbit) => {
                if rabbit.username.trim().is_empty() {
                    return Err(ConfigurationError::missing_required_field(
                        "broker.username",
                        "rabbitmq broker configuration",
                    ));
                }
            }
        }

        for (key, bot_type) in &self.bots {
            if bot_type.id.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    format!("bots.{key}.id"),
                    "bot type configuration",
                ));
            }
            for lifecycle in bot_type
                .lifecycle
                .iter()
                .chain(bot_type.instances.values().filter_map(|i| i.lifecycle.as_ref()))
            {
                lifecycle.validate(key)?;
            }
        }

        Ok(())
    }
}

/// Message broker section, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerConfiguration {
    #[serde(rename = "rabbitmq")]
    RabbitMq(RabbitMqConfiguration),
}

/// RabbitMQ credentials
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RabbitMqConfiguration {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl fmt::Debug for RabbitMqConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMqConfiguration")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("port", &self.port)
            .finish()
    }
}

/// One bot type of the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotTypeConfiguration {
    pub id: String,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub lifecycle: Option<LifecycleConfiguration>,

    #[serde(default)]
    pub publish: Option<PublishConfiguration>,

    #[serde(default)]
    pub subscribe: Vec<SubscribeConfiguration>,

    #[serde(default)]
    pub instances: HashMap<String, BotInstanceConfiguration>,
}

impl BotTypeConfiguration {
    /// Create a bare bot type with no lifecycle, publish or subscribe sections
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: None,
            lifecycle: None,
            publish: None,
            subscribe: Vec::new(),
            instances: HashMap::new(),
        }
    }

    /// Distinct subscription strategies declared for this type, in declaration order
    pub fn subscription_strategies(&self) -> Vec<SubscriptionStrategy> {
        let mut strategies = Vec::new();
        for subscription in &self.subscribe {
            if !strategies.contains(&subscription.strategy) {
                strategies.push(subscription.strategy);
            }
        }
        strategies
    }
}

/// One bot instance of a bot type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInstanceConfiguration {
    pub id: String,

    #[serde(default)]
    pub environment: Vec<String>,

    /// Overrides the bot type lifecycle when present
    #[serde(default)]
    pub lifecycle: Option<LifecycleConfiguration>,
}

impl BotInstanceConfiguration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            environment: Vec::new(),
            lifecycle: None,
        }
    }
}

/// Effective lifecycle of an instance: instance override, then type, then reactive
pub fn effective_lifecycle(
    type_configuration: &BotTypeConfiguration,
    instance_configuration: &BotInstanceConfiguration,
) -> LifecycleConfiguration {
    instance_configuration
        .lifecycle
        .clone()
        .or_else(|| type_configuration.lifecycle.clone())
        .unwrap_or_default()
}

/// Lifecycle section, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LifecycleConfiguration {
    Proactive(ProactiveLifecycleConfiguration),
    Reactive(ReactiveLifecycleConfiguration),
}

impl Default for LifecycleConfiguration {
    fn default() -> Self {
        Self::Reactive(ReactiveLifecycleConfiguration::default())
    }
}

impl LifecycleConfiguration {
    pub fn is_proactive(&self) -> bool {
        matches!(self, Self::Proactive(_))
    }

    /// Default action of a reactive lifecycle, if any non-blank one is configured
    pub fn default_action(&self) -> Option<&str> {
        match self {
            Self::Reactive(reactive) => reactive
                .order
                .as_deref()
                .filter(|order| !order.trim().is_empty()),
            Self::Proactive(_) => None,
        }
    }

    fn validate(&self, bot_type: &str) -> Result<(), ConfigurationError> {
        let Self::Proactive(proactive) = self else {
            return Ok(());
        };
        let field = |name: &str| format!("bots.{bot_type}.lifecycle.{name}");

        for (name, value) in [
            ("initialDelay", proactive.initial_delay),
            ("period", proactive.period),
        ] {
            if !value.is_finite() {
                return Err(ConfigurationError::invalid_value(
                    field(name),
                    value.to_string(),
                    "must be a finite number of seconds",
                ));
            }
        }
        if proactive.initial_delay < 0.0 {
            return Err(ConfigurationError::invalid_value(
                field("initialDelay"),
                proactive.initial_delay.to_string(),
                "initial delay cannot be negative",
            ));
        }
        Ok(())
    }
}

/// Proactive lifecycle: run a task after `initialDelay`, then every `period` seconds.
///
/// Both values are seconds and may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveLifecycleConfiguration {
    #[serde(default)]
    pub initial_delay: f64,

    /// Zero or negative means the task runs once and the bot stops
    #[serde(default)]
    pub period: f64,
}

impl ProactiveLifecycleConfiguration {
    /// Shortest repeat period the scheduler accepts
    const MIN_PERIOD: Duration = Duration::from_millis(1);

    pub fn new(initial_delay: f64, period: f64) -> Self {
        Self {
            initial_delay,
            period,
        }
    }

    /// Negative delays clamp to zero, unrepresentable ones to `Duration::MAX`
    pub fn initial_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.initial_delay.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Repeat period, `None` for one-shot lifecycles
    pub fn period(&self) -> Option<Duration> {
        (self.period > 0.0).then(|| {
            Duration::try_from_secs_f64(self.period)
                .unwrap_or(Duration::MAX)
                .max(Self::MIN_PERIOD)
        })
    }
}

/// Reactive lifecycle: run in response to incoming orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReactiveLifecycleConfiguration {
    /// Default action listened to by `Bot::on_default_order`
    #[serde(default, alias = "defaultAction")]
    pub order: Option<String>,

    #[serde(default)]
    pub keys: Vec<String>,
}

impl ReactiveLifecycleConfiguration {
    pub fn with_default_action(action: impl Into<String>) -> Self {
        Self {
            order: Some(action.into()),
            keys: Vec::new(),
        }
    }
}

/// Default publish target of a bot type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfiguration {
    #[serde(default, alias = "defaultKey")]
    pub key: Option<String>,

    #[serde(default, alias = "defaultAction")]
    pub order: Option<String>,
}

impl PublishConfiguration {
    pub fn new(key: impl Into<String>, order: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            order: Some(order.into()),
        }
    }

    /// `(key, action)` when both halves are present and non-blank
    pub fn default_target(&self) -> Option<(&str, &str)> {
        let key = self.key.as_deref().filter(|k| !k.trim().is_empty())?;
        let order = self.order.as_deref().filter(|o| !o.trim().is_empty())?;
        Some((key, order))
    }
}

/// One subscribed routing key and its delivery strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeConfiguration {
    pub key: String,

    #[serde(default)]
    pub strategy: SubscriptionStrategy,
}

impl SubscribeConfiguration {
    pub fn new(key: impl Into<String>, strategy: SubscriptionStrategy) -> Self {
        Self {
            key: key.into(),
            strategy,
        }
    }
}

/// How orders for a subscribed key are delivered among instances of a bot type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStrategy {
    /// Competing consumers: one instance receives each order
    #[default]
    Distributed,
    /// Fan-out: every instance receives each order
    Broadcast,
}

impl SubscriptionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for SubscriptionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
