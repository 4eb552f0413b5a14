//! Bot lifecycle tests: start/stop transitions, proactive scheduling on paused time,
//! heartbeats, readiness and publishing defaults.

mod common;

use botica::broker::InMemoryBroker;
use botica::client::topology;
use botica::config::{BotTypeConfiguration, PublishConfiguration};
use botica::constants::topology::ORDER_EXCHANGE;
use botica::protocol::{HeartbeatPacket, Packet, PacketType};
use botica::{BotState, BoticaError};
use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_start_announces_ready() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");

    bot.start().await.unwrap();

    assert_eq!(bot.state(), BotState::Running);
    assert!(bot.client().is_connected());
    let sent = director_inbox(&broker);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bot_id.as_deref(), Some("echo-1"));
    assert_eq!(
        sent[0].packet.as_ref().map(|p| p.packet_type()),
        Some(PacketType::Ready)
    );
}

#[tokio::test]
async fn test_double_start_fails_and_keeps_running() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");

    bot.start().await.unwrap();
    let second = bot.start().await;

    assert!(matches!(second, Err(BoticaError::AlreadyRunning)));
    assert_eq!(bot.state(), BotState::Running);
    assert!(bot.client().is_connected());
}

#[tokio::test]
async fn test_stop_is_terminal_and_idempotent() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");

    bot.start().await.unwrap();
    bot.stop().await;
    bot.stop().await;

    assert_eq!(bot.state(), BotState::Stopped);
    assert!(!bot.client().is_connected());
    assert!(matches!(bot.start().await, Err(BoticaError::BotStopped)));
}

#[tokio::test]
async fn test_failed_connect_leaves_bot_idle() {
    let broker = InMemoryBroker::new();
    broker.fail_next_connects(1);
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");

    assert!(matches!(
        bot.start().await,
        Err(BoticaError::BrokerUnreachable { .. })
    ));
    assert_eq!(bot.state(), BotState::Idle);

    bot.start().await.unwrap();
    assert_eq!(bot.state(), BotState::Running);
}

#[tokio::test]
async fn test_heartbeat_is_answered() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");
    bot.start().await.unwrap();

    send_from_director(&broker, "echo-1", HeartbeatPacket {}.into());
    wait_for_director(&broker, 2).await;

    let sent = director_packets(&broker);
    assert_eq!(sent[1], Packet::Heartbeat(HeartbeatPacket {}));
}

#[tokio::test]
async fn test_default_order_listener() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, reactive_type("echo", "echo"), "echo-1");
    let received = Arc::new(Mutex::new(Vec::new()));

    let r = Arc::clone(&received);
    bot.on_default_order(move |payload, action| {
        let r = Arc::clone(&r);
        async move {
            r.lock().push((action, payload));
            Ok(())
        }
    })
    .unwrap();
    bot.start().await.unwrap();

    let own = topology::bot_orders_queue("echo-1");
    broker.route(ORDER_EXCHANGE, &own, order_body("echo", "hello"));
    broker.wait_for_settled(&own, 1).await;

    assert_eq!(
        *received.lock(),
        vec![("echo".to_string(), "hello".to_string())]
    );
}

#[tokio::test]
async fn test_publish_to_default_target() {
    let broker = InMemoryBroker::new();
    let mut bot_type = reactive_type("crawler", "crawl");
    bot_type.publish = Some(PublishConfiguration::new("analyzers", "analyze"));
    let bot = bot_on(&broker, bot_type, "crawler-1");
    bot.start().await.unwrap();

    bot.publish_order("page").await.unwrap();
    bot.publish_order_json(&serde_json::json!({ "url": "https://example.org" }))
        .await
        .unwrap();

    let published = broker.published_to(ORDER_EXCHANGE, "analyzers");
    assert_eq!(published.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
    assert_eq!(first["action"], "analyze");
    assert_eq!(first["payload"], "page");
    let second: serde_json::Value = serde_json::from_slice(&published[1]).unwrap();
    assert_eq!(second["payload"], r#"{"url":"https://example.org"}"#);
}

#[tokio::test]
async fn test_publish_without_default_target() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, BotTypeConfiguration::new("crawler"), "crawler-1");
    bot.start().await.unwrap();

    assert!(matches!(
        bot.publish_order("page").await,
        Err(BoticaError::NoDefaultPublishTarget)
    ));
    bot.publish_order_to("analyzers", "analyze", "page")
        .await
        .unwrap();
    assert_eq!(broker.published_to(ORDER_EXCHANGE, "analyzers").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_proactive_schedule() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("ticker", 1.0, 5.0), "ticker-1");
    let runs = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let r = Arc::clone(&runs);
    bot.proactive(move || {
        let r = Arc::clone(&r);
        async move {
            r.lock().push(origin.elapsed().as_secs());
            Ok(())
        }
    })
    .unwrap();

    bot.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(*runs.lock(), vec![1, 6, 11]);

    bot.stop().await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(runs.lock().len(), 3);
    assert_eq!(bot.state(), BotState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failing_proactive_task_keeps_schedule() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("ticker", 0.0, 2.0), "ticker-1");
    let runs = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&runs);
    bot.proactive(move || {
        let r = Arc::clone(&r);
        async move {
            r.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("task failed")
        }
    })
    .unwrap();

    bot.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(bot.state(), BotState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_slow_proactive_task_never_overlaps() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("ticker", 0.0, 1.0), "ticker-1");
    let active = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, o, r) = (Arc::clone(&active), Arc::clone(&overlaps), Arc::clone(&runs));
    bot.proactive(move || {
        let (a, o, r) = (Arc::clone(&a), Arc::clone(&o), Arc::clone(&r));
        async move {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(2500)).await;
            a.fetch_sub(1, Ordering::SeqCst);
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .unwrap();

    bot.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(runs.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_proactive_stops_bot() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("oneshot", 2.0, 0.0), "oneshot-1");
    let runs = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let r = Arc::clone(&runs);
    bot.proactive(move || {
        let r = Arc::clone(&r);
        async move {
            r.lock().push(origin.elapsed().as_secs());
            Ok(())
        }
    })
    .unwrap();

    bot.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(bot.state(), BotState::Running);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*runs.lock(), vec![2]);
    assert_eq!(bot.state(), BotState::Stopped);
    assert!(!bot.client().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_initial_delay_cancels_task() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("ticker", 10.0, 5.0), "ticker-1");
    let runs = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&runs);
    bot.proactive(move || {
        let r = Arc::clone(&r);
        async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .unwrap();

    bot.start().await.unwrap();
    bot.stop().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_proactive_task_fixed_before_start() {
    let broker = InMemoryBroker::new();
    let bot = bot_on(&broker, proactive_type("ticker", 60.0, 60.0), "ticker-1");

    bot.proactive(|| async { Ok(()) }).unwrap();
    bot.start().await.unwrap();

    assert!(matches!(
        bot.proactive(|| async { Ok(()) }),
        Err(BoticaError::AlreadyRunning)
    ));
    bot.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_initial_delay_keeps_bot_running() {
    for (bot_id, period) in [("ticker-1", 5.0), ("oneshot-1", 0.0)] {
        let broker = InMemoryBroker::new();
        let bot = bot_on(&broker, proactive_type("ticker", f64::MAX, period), bot_id);
        let runs = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&runs);
        bot.proactive(move || {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();

        bot.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(bot.state(), BotState::Running);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        bot.stop().await;
        assert_eq!(bot.state(), BotState::Stopped);
    }
}
