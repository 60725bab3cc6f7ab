//! Channel front-end for the fusion engine.
//!
//! Producers (page hooks, network observers, replays) push wire messages
//! into an mpsc channel; the ingestor applies them in arrival order and
//! publishes one [`IngestOutcome`] per message. Malformed payloads are
//! reported and skipped, never fatal.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::fusion_engine::SignalFusionEngine;
use crate::domain::models::{CaptureResolution, FusionMessage};

/// Result of applying one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestOutcome {
    Resolution(CaptureResolution),
    Rejected { error: String, raw: String },
}

impl IngestOutcome {
    pub fn resolution(&self) -> Option<&CaptureResolution> {
        match self {
            Self::Resolution(resolution) => Some(resolution),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[derive(Clone)]
pub struct FusionIngestor {
    engine: Arc<Mutex<SignalFusionEngine>>,
}

impl FusionIngestor {
    pub fn new(engine: Arc<Mutex<SignalFusionEngine>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> Arc<Mutex<SignalFusionEngine>> {
        Arc::clone(&self.engine)
    }

    pub async fn apply(&self, message: &FusionMessage) -> CaptureResolution {
        debug!(attempt_id = message.attempt_id(), kind = message.kind(), "applying message");
        self.engine.lock().await.apply_message(message)
    }

    /// Parse and apply one JSON payload.
    pub async fn apply_raw(&self, raw: &str) -> IngestOutcome {
        match FusionMessage::from_json(raw) {
            Ok(message) => IngestOutcome::Resolution(self.apply(&message).await),
            Err(err) => {
                warn!(error = %err, "rejected malformed fusion message");
                IngestOutcome::Rejected {
                    error: err.to_string(),
                    raw: raw.to_string(),
                }
            }
        }
    }

    /// Apply typed messages until the inbound channel closes.
    ///
    /// Returns the number of messages applied. Stops early if the outcome
    /// receiver has been dropped.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<FusionMessage>,
        outcomes: mpsc::Sender<IngestOutcome>,
    ) -> usize {
        let mut applied = 0;
        while let Some(message) = inbound.recv().await {
            let resolution = self.apply(&message).await;
            applied += 1;
            if outcomes.send(IngestOutcome::Resolution(resolution)).await.is_err() {
                debug!("outcome receiver dropped, stopping ingestor");
                break;
            }
        }
        applied
    }

    /// Same as [`run`](Self::run) for raw JSON payloads.
    pub async fn run_raw(
        &self,
        mut inbound: mpsc::Receiver<String>,
        outcomes: mpsc::Sender<IngestOutcome>,
    ) -> usize {
        let mut handled = 0;
        while let Some(raw) = inbound.recv().await {
            let outcome = self.apply_raw(&raw).await;
            handled += 1;
            if outcomes.send(outcome).await.is_err() {
                debug!("outcome receiver dropped, stopping ingestor");
                break;
            }
        }
        handled
    }

    /// Run the typed loop on a background task.
    pub fn spawn(
        self,
        inbound: mpsc::Receiver<FusionMessage>,
        outcomes: mpsc::Sender<IngestOutcome>,
    ) -> JoinHandle<usize> {
        tokio::spawn(async move { self.run(inbound, outcomes).await })
    }
}
