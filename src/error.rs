//! # Botica Error Types
//!
//! Structured error handling for the bot runtime using thiserror.
//!
//! Errors fall into four groups:
//! - Transport errors (`NotConnected`, `AlreadyConnected`, `BrokerUnreachable`, `Broker`)
//! - Protocol decode errors (`MalformedPacket`, `UnknownPacketType`, `MissingCorrelationId`,
//!   `PacketTypeMismatch`)
//! - Lifecycle and configuration misuse (`AlreadyRunning`, `BotStopped`, `NotProactive`,
//!   `MissingProactiveTask`, `NoDefaultAction`, `NoDefaultPublishTarget`, `Configuration`)
//! - Handler faults (`HandlerFault`), which are reported at the dispatch boundary and never
//!   propagated to subscriptions or the scheduler

use crate::config::ConfigurationError;
use thiserror::Error;

/// Runtime error type for every fallible operation of the bot runtime
#[derive(Error, Debug)]
pub enum BoticaError {
    #[error("Client is not connected to the message broker")]
    NotConnected,

    #[error("Client is already connected to the message broker")]
    AlreadyConnected,

    #[error("Couldn't establish connection with the message broker after {attempts} attempts: {message}")]
    BrokerUnreachable { attempts: u32, message: String },

    #[error("Broker operation failed: {operation}: {message}")]
    Broker { operation: String, message: String },

    #[error("Malformed packet: {reason}")]
    MalformedPacket { reason: String },

    #[error("Unknown packet type: {packet_type}")]
    UnknownPacketType { packet_type: String },

    #[error("Received {packet_type} packet with no request ID")]
    MissingCorrelationId { packet_type: String },

    #[error("Packet type mismatch: expected {expected}, got {actual}")]
    PacketTypeMismatch { expected: String, actual: String },

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Bot has been stopped; build a new instance to run again")]
    BotStopped,

    #[error("Cannot register a proactive task because this bot is not configured as proactive")]
    NotProactive,

    #[error("This bot is configured as a proactive bot, but no proactive task has been registered")]
    MissingProactiveTask,

    #[error("No default order specified for this bot in the infrastructure configuration file")]
    NoDefaultAction,

    #[error("Cannot publish order: no default publish key and order in the bot type configuration")]
    NoDefaultPublishTarget,

    #[error("Handler fault in {context}: {message}")]
    HandlerFault { context: String, message: String },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BoticaError {
    /// Create a broker unreachable error
    pub fn broker_unreachable(attempts: u32, message: impl Into<String>) -> Self {
        Self::BrokerUnreachable {
            attempts,
            message: message.into(),
        }
    }

    /// Create a broker operation error
    pub fn broker(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a malformed packet error
    pub fn malformed_packet(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }

    /// Create an unknown packet type error
    pub fn unknown_packet_type(packet_type: impl Into<String>) -> Self {
        Self::UnknownPacketType {
            packet_type: packet_type.into(),
        }
    }

    /// Create a missing correlation id error
    pub fn missing_correlation_id(packet_type: impl Into<String>) -> Self {
        Self::MissingCorrelationId {
            packet_type: packet_type.into(),
        }
    }

    /// Create a packet type mismatch error
    pub fn packet_type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::PacketTypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a handler fault error
    pub fn handler_fault(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFault {
            context: context.into(),
            message: message.into(),
        }
    }
}

/// Conversion from lapin errors raised outside of a named operation
impl From<lapin::Error> for BoticaError {
    fn from(err: lapin::Error) -> Self {
        BoticaError::broker("amqp", err.to_string())
    }
}

pub type BoticaResult<T> = std::result::Result<T, BoticaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BoticaError::unknown_packet_type("telepathy");
        assert_eq!(err.to_string(), "Unknown packet type: telepathy");

        let err = BoticaError::broker_unreachable(7, "connection refused");
        assert!(err.to_string().contains("after 7 attempts"));
    }
}
