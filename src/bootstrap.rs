//! # Bot Bootstrap
//!
//! Builds the bot of the current container from its environment:
//!
//! 1. `BOTICA_*` variables give the bot type, bot id and where the director mounted
//!    the environment file
//! 2. The environment file gives the broker credentials and the bot's configuration
//! 3. A RabbitMQ connector with the configured retry policy backs the client
//!
//! The returned bot is idle; register listeners, then call `start()`.

use crate::bot::Bot;
use crate::broker::RabbitMqConnector;
use crate::client::ClientOptions;
use crate::config::{load_configuration, BrokerConfiguration, MainConfiguration, RuntimeSettings};
use crate::error::BoticaResult;
use crate::protocol::PacketRegistry;
use std::sync::Arc;
use tracing::info;

/// Build the bot described by the process environment
pub async fn botica() -> BoticaResult<Bot> {
    let settings = RuntimeSettings::from_env()?;
    let configuration = load_configuration(&settings.config_path)?;
    from_configuration(&settings, &configuration)
}

/// Build a bot from already-resolved settings and environment configuration
pub fn from_configuration(
    settings: &RuntimeSettings,
    configuration: &MainConfiguration,
) -> BoticaResult<Bot> {
    let (bot_type, instance) = configuration.resolve_bot(&settings.bot_type, &settings.bot_id)?;

    let connector = match &configuration.broker {
        BrokerConfiguration::RabbitMq(rabbit) => RabbitMqConnector::new(
            rabbit,
            settings.broker_host.clone(),
            settings.broker_port,
            settings.retry_policy(),
        )
        .with_connection_name(Bot::bot_hostname(&instance.id)),
    };

    let options = ClientOptions {
        registry: Arc::new(PacketRegistry::standard()),
        query_timeout: settings.query_timeout(),
    };

    info!(
        bot_type = %bot_type.id,
        bot_id = %instance.id,
        broker_host = %connector.host(),
        broker_port = connector.port(),
        "Bot configuration resolved"
    );

    Ok(Bot::with_connector(
        bot_type,
        instance,
        Arc::new(connector),
        options,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotState;
    use crate::config::{ConfigurationError, LifecycleConfiguration};
    use crate::error::BoticaError;
    use std::collections::HashMap;

    const ENVIRONMENT_YAML: &str = r#"
broker:
  type: rabbitmq
  username: botica
  password: secret
bots:
  ticker:
    id: ticker
    lifecycle:
      type: proactive
      initialDelay: 1
      period: 5
    instances:
      ticker-1:
        id: ticker-1
"#;

    fn settings(bot_type: &str, bot_id: &str) -> RuntimeSettings {
        RuntimeSettings::from_vars(HashMap::from([
            ("BOTICA_BOT_TYPE".to_string(), bot_type.to_string()),
            ("BOTICA_BOT_ID".to_string(), bot_id.to_string()),
        ]))
        .unwrap()
    }

    #[test]
    fn test_bot_built_idle_from_configuration() {
        let configuration: MainConfiguration = serde_yaml::from_str(ENVIRONMENT_YAML).unwrap();
        let bot = from_configuration(&settings("ticker", "ticker-1"), &configuration).unwrap();

        assert_eq!(bot.state(), BotState::Idle);
        assert_eq!(bot.hostname(), "botica-ticker-1");
        assert!(matches!(
            bot.lifecycle_configuration(),
            LifecycleConfiguration::Proactive(_)
        ));
    }

    #[test]
    fn test_unknown_instance_is_configuration_error() {
        let configuration: MainConfiguration = serde_yaml::from_str(ENVIRONMENT_YAML).unwrap();
        let result = from_configuration(&settings("ticker", "ticker-9"), &configuration);

        assert!(matches!(
            result,
            Err(BoticaError::Configuration(
                ConfigurationError::UnknownBotInstance { .. }
            ))
        ));
    }
}
