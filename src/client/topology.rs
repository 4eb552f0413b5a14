//! Queue names derived from bot type and instance ids.

use crate::config::SubscriptionStrategy;
use crate::constants::topology::{
    BOT_ORDERS_SUFFIX, BOT_PREFIX, BOT_PROTOCOL_SUFFIX, BOT_TYPE_ORDERS_INFIX,
    BOT_TYPE_ORDERS_PREFIX,
};

/// Director-owned queue shared by every instance of a bot type for one strategy
pub fn bot_type_orders_queue(bot_type: &str, strategy: SubscriptionStrategy) -> String {
    format!(
        "{BOT_TYPE_ORDERS_PREFIX}{bot_type}{BOT_TYPE_ORDERS_INFIX}{}",
        strategy.as_str()
    )
}

/// Per-instance order queue; also the routing key that addresses this instance
pub fn bot_orders_queue(bot_id: &str) -> String {
    format!("{BOT_PREFIX}{bot_id}{BOT_ORDERS_SUFFIX}")
}

/// Per-instance control queue; also its routing key on the protocol exchange
pub fn bot_protocol_queue(bot_id: &str) -> String {
    format!("{BOT_PREFIX}{bot_id}{BOT_PROTOCOL_SUFFIX}")
}
