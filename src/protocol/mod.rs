//! # Control Protocol
//!
//! Packet model, the immutable packet registry used for encoding, and the query
//! correlation engine that pairs request packets with their responses.

pub mod packet;
pub mod query;
pub mod registry;

pub use packet::{
    BotPacket, HeartbeatPacket, Packet, PacketType, ReadyPacket, RequestPacket, ResponsePacket,
    ShutdownRequestPacket, ShutdownResponsePacket, TypedPacket,
};
pub use query::QueryHandler;
pub use registry::{PacketRegistry, PacketRegistryBuilder};
