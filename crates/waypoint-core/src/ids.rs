//! Identifiers for chunks and upload sessions.
//!
//! Both are 128-bit UUIDs. The coordinator sends them as strings; the
//! node parses them at the edge and carries the typed form inward.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("invalid {what} {value:?}: {source}")]
pub struct IdError {
    what: &'static str,
    value: String,
    #[source]
    source: uuid::Error,
}

/// Names one immutable chunk of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(Uuid);

impl ChunkId {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        Uuid::parse_str(value).map(Self).map_err(|source| IdError {
            what: "chunk id",
            value: value.to_string(),
            source,
        })
    }

    /// Fixed-width lowercase hex of the 16 id bytes, no separators.
    ///
    /// This is the storage key: it depends on the id alone, so the same
    /// chunk maps to the same file across restarts.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ChunkId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Names one upload session. Issued by the coordinator, opaque to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        Uuid::parse_str(value).map(Self).map_err(|source| IdError {
            what: "session id",
            value: value.to_string(),
            source,
        })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
