//! Replay CLI command.
//!
//! Feeds a JSON Lines capture of fusion messages through a fresh engine
//! whose clock follows the message timestamps, so a session recorded in the
//! field resolves exactly as it did live.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, FusionMessage, LifecyclePhase};
use crate::domain::ports::{Clock, InMemoryProbeScheduler, ManualClock};
use crate::services::{EngineStats, FusionIngestor, SignalFusionEngine};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines file, one fusion message per line
    pub file: PathBuf,

    /// Only print the final summary
    #[arg(long)]
    pub summary_only: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReplayStep {
    pub line: usize,
    pub kind: &'static str,
    pub attempt_id: String,
    pub phase: Option<LifecyclePhase>,
    pub ready: bool,
    pub reason: String,
    pub blocking_conditions: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectedLine {
    pub line: usize,
    pub error: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ReplayOutput {
    pub applied: usize,
    pub steps: Vec<ReplayStep>,
    pub rejected: Vec<RejectedLine>,
    pub captured: Vec<String>,
    pub stats: EngineStats,
    #[serde(skip)]
    pub summary_only: bool,
}

impl CommandOutput for ReplayOutput {
    fn to_human(&self) -> String {
        let mut sections = Vec::new();

        if !self.summary_only && !self.steps.is_empty() {
            let mut table = list_table(&["line", "kind", "attempt", "phase", "ready", "reason", "blocking"]);
            for step in &self.steps {
                table.add_row(vec![
                    step.line.to_string(),
                    step.kind.to_string(),
                    truncate(&step.attempt_id, 24),
                    step.phase.map_or_else(|| "-".to_string(), |p| p.to_string()),
                    if step.ready { "yes" } else { "no" }.to_string(),
                    step.reason.clone(),
                    step.blocking_conditions.join(","),
                ]);
            }
            sections.push(table.to_string());
        }

        for rejected in &self.rejected {
            sections.push(format!("line {}: rejected: {}", rejected.line, rejected.error));
        }

        let captured = if self.captured.is_empty() {
            "none".to_string()
        } else {
            self.captured.join(", ")
        };
        sections.push(format!(
            "Applied {} message(s), rejected {}. Tracked attempts: {}. Captured: {}",
            self.applied,
            self.rejected.len(),
            self.stats.tracked_attempts,
            captured
        ));

        sections.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Replay JSON Lines `contents` through a fresh engine.
///
/// Blank lines are skipped; malformed lines are reported and skipped.
pub async fn replay_lines(contents: &str, config: &Config) -> ReplayOutput {
    let clock = Arc::new(ManualClock::new(0));
    let engine = SignalFusionEngine::new(
        config,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(InMemoryProbeScheduler::new()),
    );
    let ingestor = FusionIngestor::new(Arc::new(Mutex::new(engine)));

    let mut steps = Vec::new();
    let mut rejected = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        if raw.trim().is_empty() {
            continue;
        }

        let message = match FusionMessage::from_json(raw) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(line, error = %err, "skipping malformed replay line");
                rejected.push(RejectedLine {
                    line,
                    error: err.to_string(),
                });
                continue;
            }
        };

        clock.set(message.timestamp_ms().max(clock.now_ms()));
        let resolution = ingestor.apply(&message).await;
        steps.push(ReplayStep {
            line,
            kind: message.kind(),
            attempt_id: message.attempt_id().to_string(),
            phase: resolution.phase,
            ready: resolution.ready,
            reason: resolution.reason.to_string(),
            blocking_conditions: resolution
                .blocking_conditions
                .iter()
                .map(ToString::to_string)
                .collect(),
        });
    }

    let engine = ingestor.engine();
    let engine = engine.lock().await;
    let mut captured: Vec<String> = engine
        .tracker()
        .iter()
        .filter(|d| !d.disposed && d.phase == LifecyclePhase::CapturedReady)
        .map(|d| d.attempt_id.clone())
        .collect();
    captured.sort();

    ReplayOutput {
        applied: steps.len(),
        steps,
        rejected,
        captured,
        stats: engine.stats(),
        summary_only: false,
    }
}

pub async fn execute(args: ReplayArgs, config: &Config, json_mode: bool) -> Result<()> {
    let contents = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read replay file {}", args.file.display()))?;

    let mut result = replay_lines(&contents, config).await;
    result.summary_only = args.summary_only;
    output(&result, json_mode);
    Ok(())
}
