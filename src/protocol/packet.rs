//! # Control Protocol Packets
//!
//! The finite set of packets exchanged between a bot and the director, modeled as a
//! sum type tagged by the `type` field on the wire.
//!
//! ```text
//! {"type":"heartbeat"}
//! {"type":"shutdownRequest","requestId":"3f9c...","forced":false}
//! {"type":"bot","botId":"crawler-1","packet":{"type":"ready"}}
//! ```
//!
//! Request packets carry a `requestId` assigned when the query is sent, and name the
//! packet type of their response. Response packets carry the `requestId` they answer.

use crate::error::{BoticaError, BoticaResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tags of every packet kind known to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketType {
    Bot,
    Heartbeat,
    Ready,
    ShutdownRequest,
    ShutdownResponse,
}

impl PacketType {
    pub const ALL: [PacketType; 5] = [
        PacketType::Bot,
        PacketType::Heartbeat,
        PacketType::Ready,
        PacketType::ShutdownRequest,
        PacketType::ShutdownResponse,
    ];

    /// Wire tag of this packet type
    pub const fn tag(self) -> &'static str {
        match self {
            PacketType::Bot => "bot",
            PacketType::Heartbeat => "heartbeat",
            PacketType::Ready => "ready",
            PacketType::ShutdownRequest => "shutdownRequest",
            PacketType::ShutdownResponse => "shutdownResponse",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Whether packets of this type answer a query
    pub const fn is_response(self) -> bool {
        matches!(self, PacketType::ShutdownResponse)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A control protocol packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "bot")]
    Bot(BotPacket),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatPacket),
    #[serde(rename = "ready")]
    Ready(ReadyPacket),
    #[serde(rename = "shutdownRequest")]
    ShutdownRequest(ShutdownRequestPacket),
    #[serde(rename = "shutdownResponse")]
    ShutdownResponse(ShutdownResponsePacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Bot(_) => PacketType::Bot,
            Packet::Heartbeat(_) => PacketType::Heartbeat,
            Packet::Ready(_) => PacketType::Ready,
            Packet::ShutdownRequest(_) => PacketType::ShutdownRequest,
            Packet::ShutdownResponse(_) => PacketType::ShutdownResponse,
        }
    }

    /// Correlation id of request and response packets
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Packet::ShutdownRequest(p) => p.request_id.as_deref(),
            Packet::ShutdownResponse(p) => p.request_id.as_deref(),
            Packet::Bot(_) | Packet::Heartbeat(_) | Packet::Ready(_) => None,
        }
    }
}

/// Packets with a statically known type
pub trait TypedPacket:
    Into<Packet> + TryFrom<Packet, Error = BoticaError> + Send + 'static
{
    const PACKET_TYPE: PacketType;
}

/// Packets answered by a correlated response
pub trait RequestPacket: TypedPacket {
    type Response: ResponsePacket;

    fn request_id(&self) -> Option<&str>;

    fn set_request_id(&mut self, request_id: String);
}

/// Packets answering a request
pub trait ResponsePacket: TypedPacket {
    fn request_id(&self) -> Option<&str>;

    fn set_request_id(&mut self, request_id: String);
}

macro_rules! typed_packet {
    ($packet:ident => $variant:ident) => {
        impl From<$packet> for Packet {
            fn from(packet: $packet) -> Self {
                Packet::$variant(packet)
            }
        }

        impl TryFrom<Packet> for $packet {
            type Error = BoticaError;

            fn try_from(packet: Packet) -> BoticaResult<Self> {
                match packet {
                    Packet::$variant(inner) => Ok(inner),
                    other => Err(BoticaError::packet_type_mismatch(
                        PacketType::$variant.tag(),
                        other.packet_type().tag(),
                    )),
                }
            }
        }

        impl TypedPacket for $packet {
            const PACKET_TYPE: PacketType = PacketType::$variant;
        }
    };
}

typed_packet!(BotPacket => Bot);
typed_packet!(HeartbeatPacket => Heartbeat);
typed_packet!(ReadyPacket => Ready);
typed_packet!(ShutdownRequestPacket => ShutdownRequest);
typed_packet!(ShutdownResponsePacket => ShutdownResponse);

/// Envelope wrapping every packet a bot sends to the director
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BotPacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet: Option<Box<Packet>>,
}

impl BotPacket {
    pub fn new(bot_id: impl Into<String>, packet: Packet) -> Self {
        Self {
            bot_id: Some(bot_id.into()),
            packet: Some(Box::new(packet)),
        }
    }
}

/// Liveness probe; the bot answers every heartbeat with a heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HeartbeatPacket {}

/// Sent once the bot has connected and is ready to work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadyPacket {}

/// Director asks the bot whether it can be shut down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownRequestPacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub forced: bool,
}

impl ShutdownRequestPacket {
    pub fn new(forced: bool) -> Self {
        Self {
            request_id: None,
            forced,
        }
    }
}

impl RequestPacket for ShutdownRequestPacket {
    type Response = ShutdownResponsePacket;

    fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    fn set_request_id(&mut self, request_id: String) {
        self.request_id = Some(request_id);
    }
}

/// Bot's answer to a shutdown request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownResponsePacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub ready: bool,
}

impl ShutdownResponsePacket {
    pub fn new(ready: bool) -> Self {
        Self {
            request_id: None,
            ready,
        }
    }
}

impl ResponsePacket for ShutdownResponsePacket {
    fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    fn set_request_id(&mut self, request_id: String) {
        self.request_id = Some(request_id);
    }
}
