//! # Packet Registry
//!
//! Immutable tag to constructor table used to encode and decode control packets.
//!
//! Decoding is two-step: the `type` tag selects a registered constructor, the
//! constructor's default instance is encoded, and every field present in the payload
//! is copied over it before the concrete packet is rebuilt. Fields missing from the
//! payload keep the constructor's defaults.
//!
//! The registry is built once during bootstrap and shared by reference; it has no
//! mutation API after `build()`.

use super::packet::{Packet, PacketType, TypedPacket};
use crate::error::{BoticaError, BoticaResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

type PacketConstructor = fn() -> Packet;

/// Maps packet type tags to default constructors
#[derive(Clone)]
pub struct PacketRegistry {
    constructors: HashMap<&'static str, PacketConstructor>,
}

impl PacketRegistry {
    pub fn builder() -> PacketRegistryBuilder {
        PacketRegistryBuilder::default()
    }

    /// Registry containing every packet kind of the control protocol
    pub fn standard() -> Self {
        Self::builder()
            .register::<super::BotPacket>()
            .register::<super::HeartbeatPacket>()
            .register::<super::ReadyPacket>()
            .register::<super::ShutdownRequestPacket>()
            .register::<super::ShutdownResponsePacket>()
            .build()
    }

    pub fn is_registered(&self, packet_type: PacketType) -> bool {
        self.constructors.contains_key(packet_type.tag())
    }

    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.constructors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Encode a packet; the packet's kind must be registered
    pub fn serialize(&self, packet: &Packet) -> BoticaResult<Vec<u8>> {
        let tag = packet.packet_type().tag();
        if !self.constructors.contains_key(tag) {
            return Err(BoticaError::unknown_packet_type(tag));
        }
        Ok(serde_json::to_vec(packet)?)
    }

    /// Decode a packet from its JSON encoding
    pub fn deserialize(&self, bytes: &[u8]) -> BoticaResult<Packet> {
        let parsed: Value = serde_json::from_slice(bytes)
            .map_err(|e| BoticaError::malformed_packet(format!("invalid JSON: {e}")))?;

        let Value::Object(fields) = parsed else {
            return Err(BoticaError::malformed_packet("packet is not a JSON object"));
        };

        let tag = match fields.get("type") {
            Some(Value::String(tag)) => tag.clone(),
            Some(_) => return Err(BoticaError::malformed_packet("packet type is not a string")),
            None => return Err(BoticaError::malformed_packet("packet has no type")),
        };

        let constructor = self
            .constructors
            .get(tag.as_str())
            .ok_or_else(|| BoticaError::unknown_packet_type(&tag))?;

        let mut instance = serde_json::to_value(constructor())?;
        if let Value::Object(defaults) = &mut instance {
            defaults.extend(fields);
        }

        serde_json::from_value(instance)
            .map_err(|e| BoticaError::malformed_packet(format!("invalid {tag} packet: {e}")))
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

fn construct_default<P: TypedPacket + Default>() -> Packet {
    P::default().into()
}

/// Collects registrations before freezing them into a [`PacketRegistry`]
#[derive(Default)]
pub struct PacketRegistryBuilder {
    constructors: HashMap<&'static str, PacketConstructor>,
}

impl PacketRegistryBuilder {
    /// Register a packet kind under its own tag, constructed from `Default`
    pub fn register<P>(mut self) -> Self
    where
        P: TypedPacket + Default,
    {
        self.constructors
            .insert(P::PACKET_TYPE.tag(), construct_default::<P>);
        self
    }

    pub fn build(self) -> PacketRegistry {
        PacketRegistry {
            constructors: self.constructors,
        }
    }
}
