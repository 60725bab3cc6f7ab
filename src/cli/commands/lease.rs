//! Probe lease CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteKeyValueStore};
use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::domain::models::{Config, LeaseClaim, ProbeLeaseRecord};
use crate::domain::ports::SystemClock;
use crate::services::ProbeLeaseCoordinator;

#[derive(Args, Debug)]
pub struct LeaseArgs {
    #[command(subcommand)]
    pub command: LeaseCommands,
}

#[derive(Subcommand, Debug)]
pub enum LeaseCommands {
    /// Claim or refresh the probe lease on a conversation
    Claim {
        /// Conversation ID
        conversation_id: String,
        /// Attempt ID claiming the lease
        attempt_id: String,
        /// Lease TTL in milliseconds (defaults to lease.ttl_ms)
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Release a lease held by an attempt
    Release {
        /// Conversation ID
        conversation_id: String,
        /// Attempt ID holding the lease
        attempt_id: String,
    },
    /// List live leases
    List,
}

#[derive(Debug, serde::Serialize)]
pub struct LeaseClaimOutput {
    pub conversation_id: String,
    pub attempt_id: String,
    #[serde(flatten)]
    pub claim: LeaseClaim,
}

impl CommandOutput for LeaseClaimOutput {
    fn to_human(&self) -> String {
        let expires = self.claim.expires_at_ms.map_or_else(|| "-".to_string(), format_ms);
        if self.claim.acquired {
            format!(
                "Lease on {} granted to {} until {}",
                self.conversation_id, self.attempt_id, expires
            )
        } else if let Some(owner) = &self.claim.owner_attempt_id {
            format!(
                "Lease on {} is held by {} until {}",
                self.conversation_id, owner, expires
            )
        } else {
            format!("Lease on {} could not be written", self.conversation_id)
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct LeaseReleaseOutput {
    pub conversation_id: String,
    pub attempt_id: String,
    pub released: bool,
}

impl CommandOutput for LeaseReleaseOutput {
    fn to_human(&self) -> String {
        if self.released {
            format!("Released lease on {}", self.conversation_id)
        } else {
            format!(
                "{} does not hold the lease on {}",
                self.attempt_id, self.conversation_id
            )
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct LeaseRow {
    pub conversation_id: String,
    #[serde(flatten)]
    pub record: ProbeLeaseRecord,
}

#[derive(Debug, serde::Serialize)]
pub struct LeaseListOutput {
    pub leases: Vec<LeaseRow>,
    pub total: usize,
}

impl CommandOutput for LeaseListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["conversation", "attempt", "expires", "updated"]);
        for lease in &self.leases {
            table.add_row(vec![
                lease.conversation_id.clone(),
                lease.record.attempt_id.clone(),
                format_ms(lease.record.expires_at_ms),
                format_ms(lease.record.updated_at_ms),
            ]);
        }
        render_list("lease", &table, self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: LeaseArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.lease.database_path)
        .await
        .with_context(|| format!("Failed to open lease store at {}", config.lease.database_path))?;
    let coordinator = ProbeLeaseCoordinator::new(
        Arc::new(SqliteKeyValueStore::new(pool)),
        Arc::new(SystemClock),
        config.lease.clone(),
    );

    match args.command {
        LeaseCommands::Claim {
            conversation_id,
            attempt_id,
            ttl_ms,
        } => {
            let ttl_ms = ttl_ms.unwrap_or_else(|| coordinator.default_ttl_ms());
            let claim = coordinator.claim(&conversation_id, &attempt_id, ttl_ms).await;
            output(
                &LeaseClaimOutput {
                    conversation_id,
                    attempt_id,
                    claim,
                },
                json_mode,
            );
        }
        LeaseCommands::Release {
            conversation_id,
            attempt_id,
        } => {
            let released = coordinator.release(&conversation_id, &attempt_id).await;
            output(
                &LeaseReleaseOutput {
                    conversation_id,
                    attempt_id,
                    released,
                },
                json_mode,
            );
        }
        LeaseCommands::List => {
            let leases: Vec<LeaseRow> = coordinator
                .snapshot()
                .await
                .into_iter()
                .map(|(conversation_id, record)| LeaseRow {
                    conversation_id,
                    record,
                })
                .collect();
            let total = leases.len();
            output(&LeaseListOutput { leases, total }, json_mode);
        }
    }

    Ok(())
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms).map_or_else(|| ms.to_string(), |at| at.to_rfc3339())
}
