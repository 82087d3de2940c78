//! Coordination store client surface (§4.E).
//!
//! The store is the only place scan state transitions happen; orchestrator
//! code never mutates a `Scan` in local memory and writes it back — every
//! mutation is a named operation here so it can be made atomic by whatever
//! backs it (Postgres `UPDATE ... WHERE`, a KV store's CAS, etc).

use async_trait::async_trait;

use crate::ResourceId;
use crate::scan::{Scan, Versions};
use crate::trigger::Trigger;
use crate::{Error, Result};

/// Lifecycle event published on the pub/sub channel (§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanUpdate {
        repo_name: String,
        scan_id: ResourceId,
        status: String,
        started_at: chrono::DateTime<chrono::Utc>,
        total: u32,
    },
}

impl ScanEvent {
    pub fn scan_update(scan: &Scan) -> Self {
        ScanEvent::ScanUpdate {
            repo_name: scan.repo_name.clone(),
            scan_id: scan.id,
            status: scan.status.to_string(),
            started_at: scan.started_at,
            total: scan.total,
        }
    }
}

/// Per-stack work item enqueued for downstream workers (§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StackWorkItem {
    pub scan_id: ResourceId,
    pub repo_name: String,
    pub repo_url: String,
    pub stack_path: String,
    pub max_retries: u32,
    pub trigger: Trigger,
}

/// Operations the orchestrator invokes on the coordination store (§4.E).
///
/// Every method is atomic with respect to concurrent callers: two
/// orchestrator instances racing `start_scan` for the same repo must see
/// exactly one success and one `Error::RepoLocked`.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a scan record and acquire the repo lock in one atomic step.
    async fn start_scan(
        &self,
        repo_name: &str,
        trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> Result<Scan>;

    /// The currently running scan for a repo, if any.
    async fn get_active_scan(&self, repo_name: &str) -> Result<Option<Scan>>;

    /// Atomically cancel `old_id` (releasing its lock) and start a new scan.
    async fn cancel_and_start_scan(
        &self,
        old_id: ResourceId,
        repo_name: &str,
        reason: &str,
        new_trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> Result<Scan>;

    /// Terminal cancel of a scan not being superseded.
    async fn cancel_scan(&self, id: ResourceId, repo_name: &str, reason: &str) -> Result<()>;

    /// Terminal fail of a scan.
    async fn fail_scan(&self, id: ResourceId, repo_name: &str, reason: &str) -> Result<()>;

    /// Record the materialized workspace path and commit. Valid only while running.
    async fn set_scan_workspace(
        &self,
        id: ResourceId,
        workspace_path: &str,
        commit_sha: &str,
    ) -> Result<()>;

    /// Record detected tool versions. Valid only while running.
    async fn set_scan_versions(&self, id: ResourceId, versions: Versions) -> Result<()>;

    /// Record the discovered stack count. Valid only while running.
    async fn set_scan_total(&self, id: ResourceId, total: u32) -> Result<()>;

    /// Extend the repo lock's TTL, provided `owner` still holds it.
    /// Returns `Error::RepoLocked` if the lock is held by someone else
    /// (e.g. it already expired and was re-acquired).
    async fn renew_repo_lock(
        &self,
        repo_name: &str,
        owner: ResourceId,
        ttl: std::time::Duration,
    ) -> Result<()>;

    /// Try to acquire the clone lock for `url_hash`. Returns `true` on success.
    async fn acquire_clone_lock(
        &self,
        url_hash: &str,
        owner: &str,
        ttl: std::time::Duration,
    ) -> Result<bool>;

    /// Release the clone lock, provided `owner` still holds it.
    async fn release_clone_lock(&self, url_hash: &str, owner: &str) -> Result<()>;

    /// Extend the clone lock's TTL, provided `owner` still holds it.
    async fn renew_clone_lock(
        &self,
        url_hash: &str,
        owner: &str,
        ttl: std::time::Duration,
    ) -> Result<()>;

    /// Enqueue one work item for a downstream worker.
    async fn enqueue(&self, item: StackWorkItem) -> Result<()>;

    /// Record that enqueueing failed for a specific stack on a scan (non-fatal).
    async fn mark_scan_enqueue_failed(&self, id: ResourceId) -> Result<()>;

    /// Publish a lifecycle event.
    async fn publish_event(&self, repo_name: &str, event: ScanEvent) -> Result<()>;

    /// Point read of a scan by id.
    async fn get_scan(&self, id: ResourceId) -> Result<Scan>;
}

/// Helper constructor for the common `RepoLocked` error shape.
pub fn repo_locked(repo_name: &str) -> Error {
    Error::RepoLocked(format!("repo '{repo_name}' already has an active scan"))
}

/// Helper constructor for the common `CloneLockNotOwned` error shape.
pub fn clone_lock_not_owned(url_hash: &str) -> Error {
    Error::CloneLockNotOwned(format!("clone lock for '{url_hash}' is held by another owner"))
}
