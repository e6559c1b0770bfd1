//! waypoint-services: the node agent's protocol and ingestion logic.
//!
//! `ControlChannelConnector` receives commands, `CommandDispatcher` turns
//! them into workers, `WorkerSupervisor` runs them, and each
//! `ChunkIngestWorker` streams one session's chunks into the `ChunkStore`.

pub mod channel;
pub mod control;
pub mod dispatch;
pub mod ingest;
pub mod store;
pub mod supervisor;

pub use channel::ChannelError;
pub use control::{ControlChannelConnector, ControlState};
pub use dispatch::{CommandDispatcher, DispatchError, Worker};
pub use ingest::{ChunkIngestWorker, IngestSummary};
pub use store::{ChunkStore, StoreOutcome};
pub use supervisor::{report_loop, DrainOutcome, WorkerReport, WorkerSupervisor};
