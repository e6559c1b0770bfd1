//! Wire format for the control and data channels.
//!
//! Control channel, one JSON object per text message:
//!   { "type": "<kind>", ...kind-specific fields }
//!
//! Data channel, one JSON object per text message:
//!   { "chunkId": "<uuid>", "dataBase64": "<standard base64>" }
//!
//! Envelope decoding is table driven. Adding a command kind means adding
//! a `ControlCommand` variant and one row in `COMMAND_REGISTRY`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the envelope field that carries the command kind.
pub const KIND_FIELD: &str = "type";

// ── Control commands ──────────────────────────────────────────────────────────

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Open a data channel at `data_url` and ingest the chunks it carries.
    UploadChunks(UploadChunks),
    /// A kind this node has no decoder for. Carries only the wire name.
    Unknown { kind: String },
}

impl ControlCommand {
    /// The command kind, as it would appear on the wire.
    pub fn kind(&self) -> &str {
        match self {
            ControlCommand::UploadChunks(_) => UploadChunks::KIND,
            ControlCommand::Unknown { kind } => kind,
        }
    }
}

/// `UploadChunks` payload, exactly as received.
///
/// Fields stay raw strings here; validating them is the dispatcher's job,
/// so a malformed known command surfaces as a validation error rather
/// than as an envelope decode failure. Missing fields decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadChunks {
    pub session_id: String,
    pub data_url: String,
}

impl UploadChunks {
    pub const KIND: &'static str = "UploadChunks";
}

// ── Envelope decoding ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("control message is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("control message is not a JSON object")]
    NotAnObject,
    #[error("control message has no 'type' field")]
    MissingKind,
    #[error("control message 'type' field is not a string")]
    KindNotString,
    #[error("control message 'type' field is empty")]
    EmptyKind,
    #[error("failed to decode {kind} command: {source}")]
    Command {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

type Decoder = fn(Value) -> Result<ControlCommand, serde_json::Error>;

/// Wire kind → decoder. Kind names match ASCII-case-insensitively.
const COMMAND_REGISTRY: &[(&str, Decoder)] = &[(UploadChunks::KIND, decode_upload_chunks)];

fn decode_upload_chunks(envelope: Value) -> Result<ControlCommand, serde_json::Error> {
    serde_json::from_value(envelope).map(ControlCommand::UploadChunks)
}

/// Decode one control-channel text message.
///
/// Unrecognised kinds are not an error: they come back as
/// `ControlCommand::Unknown` so the caller decides what "not handled" means.
pub fn decode_envelope(text: &str) -> Result<ControlCommand, EnvelopeError> {
    let envelope: Value = serde_json::from_str(text).map_err(EnvelopeError::Json)?;
    let object = envelope.as_object().ok_or(EnvelopeError::NotAnObject)?;

    let kind = match object.get(KIND_FIELD) {
        None | Some(Value::Null) => return Err(EnvelopeError::MissingKind),
        Some(Value::String(kind)) => kind.trim().to_string(),
        Some(_) => return Err(EnvelopeError::KindNotString),
    };
    if kind.is_empty() {
        return Err(EnvelopeError::EmptyKind);
    }

    match COMMAND_REGISTRY
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&kind))
    {
        Some(&(name, decode)) => {
            decode(envelope).map_err(|source| EnvelopeError::Command { kind: name, source })
        }
        None => Ok(ControlCommand::Unknown { kind }),
    }
}

/// Wire names of every command kind this node can decode.
pub fn known_kinds() -> impl Iterator<Item = &'static str> {
    COMMAND_REGISTRY.iter().map(|(name, _)| *name)
}

// ── Data channel ──────────────────────────────────────────────────────────────

/// One chunk as carried on a data channel. Transient; never stored as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkMessage {
    pub chunk_id: String,
    pub data_base64: String,
}

impl ChunkMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
