//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Bots run inside containers managed by the director, so logs go to stdout only.
//!
//! - `RUST_LOG` / `LOG_LEVEL` override the level; otherwise it is derived from `BOTICA_ENV`
//! - ANSI output on a TTY, JSON lines otherwise (container log collectors)
//! - Initialization is idempotent and tolerates an already-installed global subscriber

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console tracing for the bot process
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let result = if use_ansi {
            let console_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(&log_level));
            tracing_subscriber::registry().with(console_layer).try_init()
        } else {
            let json_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(&log_level));
            tracing_subscriber::registry().with(json_layer).try_init()
        };

        if result.is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                log_level = %log_level,
                "Console logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var("BOTICA_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    level_for_environment(environment).to_string()
}

fn level_for_environment(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
