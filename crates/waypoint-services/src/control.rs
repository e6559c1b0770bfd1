//! Control channel connector.
//!
//! Keeps one websocket session open against the coordinator and turns
//! every inbound command into a running worker:
//!
//!   Disconnected → Connecting → Connected → (Closing | Faulted) → Disconnected → ...
//!
//! Any way out of `Connected` other than cancellation leads to a fixed
//! reconnect wait and another attempt. Nothing here returns an error; it
//! is the top-level supervisory loop, so failures are logged and retried.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use waypoint_core::decode_envelope;

use crate::channel::{self, ChannelError, Inbound, WsStream};
use crate::dispatch::CommandDispatcher;
use crate::supervisor::WorkerSupervisor;

const CHANNEL: &str = "control";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Faulted,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::Disconnected => "disconnected",
            ControlState::Connecting => "connecting",
            ControlState::Connected => "connected",
            ControlState::Closing => "closing",
            ControlState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// How a connected session ended.
enum SessionEnd {
    ClosedByRemote,
    Cancelled,
    Failed(ChannelError),
}

pub struct ControlChannelConnector {
    coordinator_url: Url,
    reconnect_delay: Duration,
    dispatcher: CommandDispatcher,
    supervisor: WorkerSupervisor,
    state: watch::Sender<ControlState>,
}

impl ControlChannelConnector {
    pub fn new(
        coordinator_url: Url,
        reconnect_delay: Duration,
        dispatcher: CommandDispatcher,
        supervisor: WorkerSupervisor,
    ) -> Self {
        let (state, _) = watch::channel(ControlState::Disconnected);
        Self {
            coordinator_url,
            reconnect_delay,
            dispatcher,
            supervisor,
            state,
        }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<ControlState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires. Workers started from here share `cancel`.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(url = %self.coordinator_url, "control channel connector started");

        while !cancel.is_cancelled() {
            self.transition(ControlState::Connecting);
            tracing::info!(url = %self.coordinator_url, "connecting to coordinator");

            match channel::connect(&self.coordinator_url, &cancel).await {
                Ok(None) => break,
                Ok(Some(mut ws)) => {
                    self.transition(ControlState::Connected);
                    tracing::info!("control channel established");

                    match self.receive_loop(&mut ws, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::ClosedByRemote => {
                            self.transition(ControlState::Closing);
                            tracing::info!("control channel closed by coordinator");
                            channel::close(&mut ws, CHANNEL).await;
                        }
                        SessionEnd::Failed(e) => {
                            self.transition(ControlState::Faulted);
                            tracing::error!(error = %e, "control channel failed");
                        }
                    }
                }
                Err(e) => {
                    self.transition(ControlState::Faulted);
                    tracing::error!(error = %e, "failed to establish control channel");
                }
            }

            self.transition(ControlState::Disconnected);
            if cancel.is_cancelled() {
                break;
            }

            tracing::info!(
                url = %self.coordinator_url,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "reconnecting after delay"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.transition(ControlState::Disconnected);
        tracing::info!("control channel connector stopped");
    }

    async fn receive_loop(&self, ws: &mut WsStream, cancel: &CancellationToken) -> SessionEnd {
        loop {
            match channel::next_text(ws, cancel, CHANNEL).await {
                Ok(Inbound::Text(text)) => self.handle_message(&text, cancel),
                Ok(Inbound::Closed) => return SessionEnd::ClosedByRemote,
                Ok(Inbound::Cancelled) => return SessionEnd::Cancelled,
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }

    /// Decode, dispatch and launch. Never blocks on the worker.
    fn handle_message(&self, text: &str, cancel: &CancellationToken) {
        let command = match decode_envelope(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "dropping control message");
                return;
            }
        };

        let kind = command.kind().to_string();
        match self.dispatcher.create(command) {
            Ok(Some(worker)) => {
                let session_id = worker.session_id();
                self.supervisor.spawn(worker, cancel.clone());
                tracing::info!(kind = %kind, %session_id, "worker started for command");
            }
            Ok(None) => {
                tracing::warn!(kind = %kind, "no worker for command kind, dropping");
            }
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "rejected malformed command");
            }
        }
    }

    fn transition(&self, next: ControlState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "control state");
        }
    }
}
