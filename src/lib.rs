#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Botica Bot Runtime
//!
//! Runtime library embedded in every bot of a Botica environment.
//!
//! A bot connects to the environment's message broker, exchanges domain orders with
//! its peers, and speaks a small control protocol with the director: heartbeats,
//! readiness announcements and graceful-shutdown negotiation. Its lifecycle is either
//! proactive (a task on a timer) or reactive (listeners triggered by orders).
//!
//! ## Module Organization
//!
//! - [`bot`] - Lifecycle controller, proactive scheduler and shutdown negotiation
//! - [`client`] - Order and packet facade over the broker topology
//! - [`protocol`] - Packet model, packet registry and query correlation
//! - [`broker`] - Transport trait with RabbitMQ and in-memory implementations
//! - [`config`] - Environment file model and runtime settings
//! - [`bootstrap`] - Builds the container's bot from its environment
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> botica::BoticaResult<()> {
//! botica::logging::init_tracing();
//!
//! let bot = botica::bootstrap::botica().await?;
//! bot.proactive(|| async {
//!     tracing::info!("Tick");
//!     Ok(())
//! })?;
//! bot.on_shutdown_request(|request, response| async move {
//!     if !request.is_forced() {
//!         response.set_canceled(true);
//!     }
//!     Ok(())
//! });
//! bot.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod bot;
pub mod broker;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod fault;
pub mod logging;
pub mod protocol;

pub use bot::{Bot, BotState, ShutdownHandler, ShutdownRequest, ShutdownResponse};
pub use client::{BoticaClient, ClientOptions};
pub use error::{BoticaError, BoticaResult};
pub use protocol::{Packet, PacketRegistry, PacketType};
