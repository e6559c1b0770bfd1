//! waypoint-core: identifiers, wire format, and configuration shared by
//! the Waypoint node agent crates.

pub mod config;
pub mod ids;
pub mod wire;

pub use config::{ConfigError, NodeConfig};
pub use ids::{ChunkId, IdError, SessionId};
pub use wire::{
    decode_envelope, known_kinds, ChunkMessage, ControlCommand, EnvelopeError, UploadChunks,
};
