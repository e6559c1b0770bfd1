//! Chunk ingest worker: consumes one upload session's data channel and
//! commits every chunk it carries to the `ChunkStore`.
//!
//! The data channel is one-directional: the coordinator side streams
//! `ChunkMessage`s, the node never replies. One bad message is skipped,
//! never fatal. Connection and storage failures end the session.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

use waypoint_core::{ChunkId, ChunkMessage, SessionId};

use crate::channel::{self, Inbound};
use crate::store::{ChunkStore, StoreOutcome};

const CHANNEL: &str = "data";

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Chunks newly committed to storage.
    pub stored: u64,
    /// Chunks that were already present.
    pub duplicates: u64,
    /// Messages dropped as malformed.
    pub skipped: u64,
}

/// A message that made it through decoding.
struct DecodedChunk {
    id: ChunkId,
    data: Bytes,
}

pub struct ChunkIngestWorker {
    session_id: SessionId,
    data_url: Url,
    store: ChunkStore,
}

impl ChunkIngestWorker {
    pub fn new(session_id: SessionId, data_url: Url, store: ChunkStore) -> Self {
        Self {
            session_id,
            data_url,
            store,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn data_url(&self) -> &Url {
        &self.data_url
    }

    /// Run the session to completion.
    ///
    /// Ends cleanly on a close frame or on cancellation. A failed connect
    /// is not retried. Stores are awaited one at a time, so chunks are
    /// committed in arrival order and a store in progress when
    /// cancellation fires is allowed to finish.
    pub async fn run(self, cancel: CancellationToken) -> Result<IngestSummary> {
        tracing::info!(
            session_id = %self.session_id,
            url = %self.data_url,
            "starting chunk ingest"
        );

        let mut summary = IngestSummary::default();
        let Some(mut ws) = channel::connect(&self.data_url, &cancel)
            .await
            .with_context(|| format!("session {} could not open data channel", self.session_id))?
        else {
            tracing::info!(session_id = %self.session_id, "cancelled before data channel opened");
            return Ok(summary);
        };

        loop {
            let text = match channel::next_text(&mut ws, &cancel, CHANNEL)
                .await
                .with_context(|| format!("session {} data channel failed", self.session_id))?
            {
                Inbound::Text(text) => text,
                Inbound::Closed => {
                    tracing::info!(session_id = %self.session_id, "data channel closed by peer");
                    channel::close(&mut ws, CHANNEL).await;
                    break;
                }
                Inbound::Cancelled => {
                    tracing::info!(session_id = %self.session_id, "chunk ingest cancelled");
                    break;
                }
            };

            let Some(chunk) = self.decode(&text) else {
                summary.skipped += 1;
                continue;
            };

            let len = chunk.data.len();
            match self.store.store(chunk.id, &chunk.data).await? {
                StoreOutcome::Committed => {
                    summary.stored += 1;
                    tracing::info!(
                        session_id = %self.session_id,
                        chunk_id = %chunk.id,
                        bytes = len,
                        "chunk ingested"
                    );
                }
                StoreOutcome::Duplicate => summary.duplicates += 1,
            }
        }

        Ok(summary)
    }

    /// Decode one message. Anything malformed is logged and yields `None`.
    fn decode(&self, text: &str) -> Option<DecodedChunk> {
        let msg = match ChunkMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "undecodable chunk message, skipping"
                );
                return None;
            }
        };

        let id = match ChunkId::parse(&msg.chunk_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "invalid chunk id, skipping"
                );
                return None;
            }
        };

        match BASE64.decode(msg.data_base64.as_bytes()) {
            Ok(data) => Some(DecodedChunk {
                id,
                data: Bytes::from(data),
            }),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    chunk_id = %id,
                    error = %e,
                    "chunk payload is not valid base64, skipping"
                );
                None
            }
        }
    }
}
