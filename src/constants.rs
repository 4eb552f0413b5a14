//! # Runtime Constants
//!
//! Broker topology names and protocol defaults shared with the Botica director.
//! These values are part of the wire contract: changing any of them breaks
//! interoperability with running directors.

use std::time::Duration;

/// Prefix of every bot container hostname
pub const CONTAINER_PREFIX: &str = "botica-";

/// Directory shared by every bot container in the environment
pub const SHARED_DIRECTORY: &str = "/shared/";

/// Broker topology names
pub mod topology {
    /// Exchange carrying domain orders between bots
    pub const ORDER_EXCHANGE: &str = "botica.order";

    /// Exchange carrying the control protocol between bots and the director
    pub const PROTOCOL_EXCHANGE: &str = "botica.protocol";

    /// Routing key of the director's inbound protocol queue
    pub const DIRECTOR_PROTOCOL: &str = "director.protocol";

    // Formats below are expanded by `client::topology`
    pub const BOT_TYPE_ORDERS_PREFIX: &str = "bot_type.";
    pub const BOT_TYPE_ORDERS_INFIX: &str = ".orders.";
    pub const BOT_PREFIX: &str = "bot.";
    pub const BOT_ORDERS_SUFFIX: &str = ".orders";
    pub const BOT_PROTOCOL_SUFFIX: &str = ".protocol";
}

/// Broker connection defaults
pub mod broker {
    use super::Duration;

    /// Default AMQP port
    pub const DEFAULT_PORT: u16 = 5672;

    /// Hostname of the broker container
    pub const DEFAULT_HOST: &str = "botica-rabbitmq";

    /// Maximum connection attempts before giving up
    pub const MAX_CONNECT_ATTEMPTS: u32 = 7;

    /// Wait between connection attempts
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

    /// Messages in flight per subscription; 1 gives strict per-queue ordering
    pub const SUBSCRIPTION_PREFETCH: u16 = 1;
}

/// Control protocol defaults
pub mod protocol {
    use super::Duration;

    /// Default time a query waits for its response
    pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(3000);
}

/// Environment variables and paths used by `bootstrap`
pub mod environment {
    /// Prefix of every runtime setting environment variable
    pub const ENV_PREFIX: &str = "BOTICA";

    /// Where the director mounts the environment configuration file
    pub const DEFAULT_CONFIG_PATH: &str = "/run/secrets/botica-config";
}
