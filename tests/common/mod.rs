//! # Test Utilities
//!
//! Builders for bots and clients wired to an [`InMemoryBroker`], with the
//! director-owned topology (bot type queues and their bindings) pre-declared the way
//! a running director would leave it.

#![expect(
    dead_code,
    reason = "Shared helpers; each integration test binary uses a subset"
)]

use botica::broker::{InMemoryBroker, InMemoryConnector};
use botica::client::topology;
use botica::config::{
    BotInstanceConfiguration, BotTypeConfiguration, LifecycleConfiguration,
    ProactiveLifecycleConfiguration, ReactiveLifecycleConfiguration, SubscribeConfiguration,
};
use botica::constants::topology::{DIRECTOR_PROTOCOL, ORDER_EXCHANGE, PROTOCOL_EXCHANGE};
use botica::protocol::{BotPacket, Packet, PacketRegistry};
use botica::{Bot, ClientOptions};
use std::sync::Arc;

/// Bot type with a reactive lifecycle listening to `default_action`
pub fn reactive_type(id: &str, default_action: &str) -> BotTypeConfiguration {
    let mut bot_type = BotTypeConfiguration::new(id);
    bot_type.lifecycle = Some(LifecycleConfiguration::Reactive(
        ReactiveLifecycleConfiguration::with_default_action(default_action),
    ));
    bot_type
}

/// Bot type with a proactive lifecycle
pub fn proactive_type(id: &str, initial_delay: f64, period: f64) -> BotTypeConfiguration {
    let mut bot_type = BotTypeConfiguration::new(id);
    bot_type.lifecycle = Some(LifecycleConfiguration::Proactive(
        ProactiveLifecycleConfiguration::new(initial_delay, period),
    ));
    bot_type
}

/// Declare the queues and bindings the director creates for a bot type's subscriptions
pub fn declare_director_topology(broker: &InMemoryBroker, bot_type: &BotTypeConfiguration) {
    for SubscribeConfiguration { key, strategy } in &bot_type.subscribe {
        let queue = topology::bot_type_orders_queue(&bot_type.id, *strategy);
        broker.declare_queue(&queue);
        broker.declare_binding(ORDER_EXCHANGE, key, &queue);
    }
}

/// Idle bot over `broker`, with the director topology already in place
pub fn bot_on(broker: &InMemoryBroker, bot_type: BotTypeConfiguration, bot_id: &str) -> Bot {
    declare_director_topology(broker, &bot_type);
    Bot::with_connector(
        bot_type,
        BotInstanceConfiguration::new(bot_id),
        Arc::new(InMemoryConnector::immediate(broker)),
        ClientOptions::default(),
    )
}

/// Deliver a packet from the director to a bot's protocol queue
pub fn send_from_director(broker: &InMemoryBroker, bot_id: &str, packet: Packet) {
    let bytes = PacketRegistry::standard()
        .serialize(&packet)
        .expect("packet should serialize");
    broker.route(PROTOCOL_EXCHANGE, &topology::bot_protocol_queue(bot_id), bytes);
}

/// Every envelope published to the director, decoded
pub fn director_inbox(broker: &InMemoryBroker) -> Vec<BotPacket> {
    let registry = PacketRegistry::standard();
    broker
        .published_to(PROTOCOL_EXCHANGE, DIRECTOR_PROTOCOL)
        .iter()
        .map(|bytes| match registry.deserialize(bytes) {
            Ok(Packet::Bot(envelope)) => envelope,
            other => panic!("expected a bot envelope, got {other:?}"),
        })
        .collect()
}

/// Inner packets sent to the director, in order
pub fn director_packets(broker: &InMemoryBroker) -> Vec<Packet> {
    director_inbox(broker)
        .into_iter()
        .filter_map(|envelope| envelope.packet.map(|packet| *packet))
        .collect()
}

/// Wait until the director has received `count` packets
pub async fn wait_for_director(broker: &InMemoryBroker, count: usize) {
    broker
        .wait_for_published(PROTOCOL_EXCHANGE, DIRECTOR_PROTOCOL, count)
        .await;
}

/// Order body as published on the order exchange
pub fn order_body(action: &str, payload: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "action": action, "payload": payload }))
        .expect("order should serialize")
}
