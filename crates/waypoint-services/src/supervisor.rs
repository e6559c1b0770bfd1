//! Worker supervision.
//!
//! The control loop hands workers here and moves on. Every worker runs as
//! its own task; when it finishes, its outcome is posted as a
//! `WorkerReport` so failures are observable instead of lost with the
//! task. Shutdown waits for all tracked workers.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt as _;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use waypoint_core::SessionId;

use crate::dispatch::Worker;
use crate::ingest::IngestSummary;

/// How one worker ended.
#[derive(Debug)]
pub struct WorkerReport {
    pub kind: &'static str,
    pub session_id: SessionId,
    pub outcome: anyhow::Result<IngestSummary>,
}

/// How a bounded shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every worker finished and every report was logged.
    Complete,
    /// Every worker finished, but the report loop died first.
    ReportLoopFailed,
    /// The grace period ran out with workers still running.
    TimedOut { active: usize },
}

#[derive(Clone)]
pub struct WorkerSupervisor {
    tracker: TaskTracker,
    reports: mpsc::UnboundedSender<WorkerReport>,
}

impl WorkerSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkerReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        (
            Self {
                tracker: TaskTracker::new(),
                reports,
            },
            rx,
        )
    }

    /// Start `worker` as an independent task. Never blocks.
    pub fn spawn(&self, worker: Worker, cancel: CancellationToken) {
        let kind = worker.kind();
        let session_id = worker.session_id();
        let reports = self.reports.clone();

        self.tracker.spawn(async move {
            let outcome = match AssertUnwindSafe(worker.run(cancel)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(anyhow::anyhow!("worker panicked: {}", panic_message(&*panic))),
            };
            if reports
                .send(WorkerReport {
                    kind,
                    session_id,
                    outcome,
                })
                .is_err()
            {
                tracing::debug!(kind, %session_id, "report receiver gone, outcome dropped");
            }
        });
        tracing::debug!(kind, %session_id, active = self.active(), "worker spawned");
    }

    /// Number of workers still running.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every running worker to finish. Callers bound this with a
    /// timeout.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Wait up to `grace` for workers, then for `report_task` to log what
    /// they reported. Every other clone of this supervisor must already be
    /// gone, or the report loop never sees its channel close.
    pub async fn drain(self, grace: Duration, report_task: JoinHandle<()>) -> DrainOutcome {
        if tokio::time::timeout(grace, self.shutdown()).await.is_err() {
            report_task.abort();
            return DrainOutcome::TimedOut {
                active: self.active(),
            };
        }

        drop(self);
        match report_task.await {
            Ok(()) => DrainOutcome::Complete,
            Err(e) => {
                tracing::error!(error = %e, "worker report loop ended abnormally");
                DrainOutcome::ReportLoopFailed
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Log every worker report until all supervisors are dropped.
pub async fn report_loop(mut reports: mpsc::UnboundedReceiver<WorkerReport>) {
    while let Some(report) = reports.recv().await {
        match report.outcome {
            Ok(summary) => tracing::info!(
                kind = report.kind,
                session_id = %report.session_id,
                stored = summary.stored,
                duplicates = summary.duplicates,
                skipped = summary.skipped,
                "worker finished"
            ),
            Err(e) => {
                let detail = format!("{e:#}");
                tracing::error!(
                    kind = report.kind,
                    session_id = %report.session_id,
                    error = %detail,
                    "worker failed"
                );
            }
        }
    }
}
