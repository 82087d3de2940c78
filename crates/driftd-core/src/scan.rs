//! Scan entity: the central record of the orchestrator's state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;
use crate::trigger::Trigger;

/// Status of a scan. Transitions are monotonic and only ever move via
/// store operations (§4.E), never purely in local memory: `Pending` ->
/// `Running` -> one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Canceled
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Pending => write!(f, "pending"),
            ScanStatus::Running => write!(f, "running"),
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Failed => write!(f, "failed"),
            ScanStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "canceled" => Ok(ScanStatus::Canceled),
            _ => Err(format!("unknown scan status: {}", s)),
        }
    }
}

/// Terraform/Terragrunt version assignment for a scan: one default per
/// tool plus per-stack overrides. See §4.C's collapse rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Versions {
    pub default_terraform: String,
    pub default_terragrunt: String,
    pub stack_terraform: HashMap<String, String>,
    pub stack_terragrunt: HashMap<String, String>,
}

/// The central scan record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ResourceId,
    pub repo_name: String,
    pub trigger: Trigger,
    /// Requested ref; may be empty (meaning "whatever the materializer resolves to").
    pub commit: String,
    /// Set exactly once, after materialization, before `total`.
    pub commit_sha: Option<String>,
    pub workspace_path: Option<String>,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub total: u32,
    pub queued: u32,
    pub versions: Versions,
    pub actor: String,
}

impl Scan {
    /// §3 invariant: `total >= queued >= 0` and `commit_sha` set before `total > 0`.
    pub fn is_consistent(&self) -> bool {
        let counts_ok = self.total >= self.queued;
        let commit_before_total = self.total == 0 || self.commit_sha.is_some();
        counts_ok && commit_before_total
    }
}
