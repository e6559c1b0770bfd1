//! Maps decoded control commands to runnable workers.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use url::Url;

use waypoint_core::{ControlCommand, IdError, SessionId, UploadChunks};

use crate::ingest::{ChunkIngestWorker, IngestSummary};
use crate::store::ChunkStore;

/// A known command that failed validation. Distinct from "no worker for
/// this kind", which is `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{kind}: {source}")]
    InvalidSessionId {
        kind: &'static str,
        #[source]
        source: IdError,
    },
    #[error("{kind}: invalid data url {url:?}: {source}")]
    InvalidDataUrl {
        kind: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{kind}: data url {url} must use ws or wss")]
    UnsupportedScheme { kind: &'static str, url: Url },
}

/// One runnable unit of work, produced per recognised command.
pub enum Worker {
    UploadChunks(ChunkIngestWorker),
}

impl Worker {
    pub fn kind(&self) -> &'static str {
        match self {
            Worker::UploadChunks(_) => UploadChunks::KIND,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Worker::UploadChunks(w) => w.session_id(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<IngestSummary> {
        match self {
            Worker::UploadChunks(w) => w.run(cancel).await,
        }
    }
}

/// Stateless apart from the store handle; share it freely.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: ChunkStore,
}

impl CommandDispatcher {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Build the worker for `command`.
    ///
    /// `Ok(None)` means this node has no worker for the command's kind.
    pub fn create(&self, command: ControlCommand) -> Result<Option<Worker>, DispatchError> {
        match command {
            ControlCommand::UploadChunks(cmd) => self.upload_worker(cmd).map(Some),
            ControlCommand::Unknown { .. } => Ok(None),
        }
    }

    fn upload_worker(&self, cmd: UploadChunks) -> Result<Worker, DispatchError> {
        let kind = UploadChunks::KIND;
        let session_id = SessionId::parse(&cmd.session_id)
            .map_err(|source| DispatchError::InvalidSessionId { kind, source })?;
        let data_url = Url::parse(&cmd.data_url).map_err(|source| DispatchError::InvalidDataUrl {
            kind,
            url: cmd.data_url.clone(),
            source,
        })?;
        if !matches!(data_url.scheme(), "ws" | "wss") {
            return Err(DispatchError::UnsupportedScheme { kind, url: data_url });
        }

        Ok(Worker::UploadChunks(ChunkIngestWorker::new(
            session_id,
            data_url,
            self.store.clone(),
        )))
    }
}
