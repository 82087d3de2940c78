//! In-memory `CoordinationStore`: deterministic, no external dependencies,
//! used in the other crates' tests and by the daemon's `--no-db` / local
//! dev mode.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use driftd_core::{
    store::{clone_lock_not_owned, repo_locked, CoordinationStore, ScanEvent, StackWorkItem},
    Error, ResourceId, Result, Scan, ScanStatus, Versions,
};
use driftd_core::trigger::Trigger;

struct RepoLock {
    scan_id: ResourceId,
    expires_at: Instant,
}

struct CloneLock {
    owner: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    scans: HashMap<ResourceId, Scan>,
    repo_locks: HashMap<String, RepoLock>,
    clone_locks: HashMap<String, CloneLock>,
    events: Vec<(String, ScanEvent)>,
    enqueued: Vec<StackWorkItem>,
    enqueue_failures: HashMap<ResourceId, u32>,
}

/// In-memory coordination store. All mutation goes through a single mutex,
/// so operations are serialized but remain atomic with respect to each
/// other the way the Postgres implementation is via row locking.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot of published events.
    pub fn published_events(&self) -> Vec<(String, ScanEvent)> {
        self.state.lock().unwrap().events.clone()
    }

    /// Test helper: snapshot of enqueued work items.
    pub fn enqueued_items(&self) -> Vec<StackWorkItem> {
        self.state.lock().unwrap().enqueued.clone()
    }

    /// Test helper: number of times `mark_scan_enqueue_failed` was called for a scan.
    pub fn enqueue_failure_count(&self, id: ResourceId) -> u32 {
        *self.state.lock().unwrap().enqueue_failures.get(&id).unwrap_or(&0)
    }

    fn lock_is_live(lock: &RepoLock) -> bool {
        lock.expires_at > Instant::now()
    }

    fn insert_scan_locked(
        state: &mut State,
        repo_name: &str,
        trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> std::result::Result<Scan, Error> {
        if let Some(existing) = state.repo_locks.get(repo_name) {
            if Self::lock_is_live(existing) {
                return Err(repo_locked(repo_name));
            }
        }

        let id = ResourceId::new();
        state.repo_locks.insert(
            repo_name.to_string(),
            RepoLock { scan_id: id, expires_at: Instant::now() + Duration::from_secs(3600) },
        );

        let scan = Scan {
            id,
            repo_name: repo_name.to_string(),
            trigger,
            commit: commit.to_string(),
            commit_sha: None,
            workspace_path: None,
            status: ScanStatus::Running,
            started_at: Utc::now(),
            total: 0,
            queued: 0,
            versions: Versions::default(),
            actor: actor.to_string(),
        };
        state.scans.insert(id, scan.clone());
        Ok(scan)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn start_scan(&self, repo_name: &str, trigger: Trigger, commit: &str, actor: &str) -> Result<Scan> {
        let mut state = self.state.lock().unwrap();
        Self::insert_scan_locked(&mut state, repo_name, trigger, commit, actor)
    }

    async fn get_active_scan(&self, repo_name: &str) -> Result<Option<Scan>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .repo_locks
            .get(repo_name)
            .filter(|l| Self::lock_is_live(l))
            .and_then(|l| state.scans.get(&l.scan_id))
            .filter(|s| s.status == ScanStatus::Running)
            .cloned())
    }

    async fn cancel_and_start_scan(
        &self,
        old_id: ResourceId,
        repo_name: &str,
        _reason: &str,
        new_trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> Result<Scan> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&old_id) {
            if !scan.status.is_terminal() {
                scan.status = ScanStatus::Canceled;
            }
        }
        state.repo_locks.remove(repo_name);
        Self::insert_scan_locked(&mut state, repo_name, new_trigger, commit, actor)
    }

    async fn cancel_scan(&self, id: ResourceId, repo_name: &str, _reason: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&id) {
            if !scan.status.is_terminal() {
                scan.status = ScanStatus::Canceled;
            }
        }
        state.repo_locks.remove(repo_name);
        Ok(())
    }

    async fn fail_scan(&self, id: ResourceId, repo_name: &str, _reason: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&id) {
            if !scan.status.is_terminal() {
                scan.status = ScanStatus::Failed;
            }
        }
        state.repo_locks.remove(repo_name);
        Ok(())
    }

    async fn set_scan_workspace(&self, id: ResourceId, workspace_path: &str, commit_sha: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&id) {
            if scan.status == ScanStatus::Running {
                scan.workspace_path = Some(workspace_path.to_string());
                scan.commit_sha = Some(commit_sha.to_string());
            }
        }
        Ok(())
    }

    async fn set_scan_versions(&self, id: ResourceId, versions: Versions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&id) {
            if scan.status == ScanStatus::Running {
                scan.versions = versions;
            }
        }
        Ok(())
    }

    async fn set_scan_total(&self, id: ResourceId, total: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(scan) = state.scans.get_mut(&id) {
            if scan.status == ScanStatus::Running {
                scan.total = total;
            }
        }
        Ok(())
    }

    async fn renew_repo_lock(&self, repo_name: &str, owner: ResourceId, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.repo_locks.get_mut(repo_name) {
            Some(lock) if lock.scan_id == owner => {
                lock.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(repo_locked(repo_name)),
        }
    }

    async fn acquire_clone_lock(&self, url_hash: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let live = state.clone_locks.get(url_hash).map(|l| l.expires_at > Instant::now()).unwrap_or(false);
        if live {
            return Ok(false);
        }
        state
            .clone_locks
            .insert(url_hash.to_string(), CloneLock { owner: owner.to_string(), expires_at: Instant::now() + ttl });
        Ok(true)
    }

    async fn release_clone_lock(&self, url_hash: &str, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.clone_locks.get(url_hash) {
            Some(lock) if lock.owner == owner => {
                state.clone_locks.remove(url_hash);
                Ok(())
            }
            _ => Err(clone_lock_not_owned(url_hash)),
        }
    }

    async fn renew_clone_lock(&self, url_hash: &str, owner: &str, ttl: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.clone_locks.get_mut(url_hash) {
            Some(lock) if lock.owner == owner => {
                lock.expires_at = Instant::now() + ttl;
                Ok(())
            }
            _ => Err(clone_lock_not_owned(url_hash)),
        }
    }

    async fn enqueue(&self, item: StackWorkItem) -> Result<()> {
        self.state.lock().unwrap().enqueued.push(item);
        Ok(())
    }

    async fn mark_scan_enqueue_failed(&self, id: ResourceId) -> Result<()> {
        *self.state.lock().unwrap().enqueue_failures.entry(id).or_insert(0) += 1;
        Ok(())
    }

    async fn publish_event(&self, repo_name: &str, event: ScanEvent) -> Result<()> {
        self.state.lock().unwrap().events.push((repo_name.to_string(), event));
        Ok(())
    }

    async fn get_scan(&self, id: ResourceId) -> Result<Scan> {
        self.state
            .lock()
            .unwrap()
            .scans
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("scan {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_start_scan_is_rejected_while_first_is_running() {
        let store = InMemoryStore::new();
        store.start_scan("acme/infra", Trigger::Scheduled, "", "").await.unwrap();
        let err = store.start_scan("acme/infra", Trigger::Scheduled, "", "").await.unwrap_err();
        assert!(matches!(err, Error::RepoLocked(_)));
    }

    #[tokio::test]
    async fn cancel_and_start_scan_replaces_the_active_scan() {
        let store = InMemoryStore::new();
        let first = store.start_scan("acme/infra", Trigger::Scheduled, "", "").await.unwrap();
        let second = store
            .cancel_and_start_scan(first.id, "acme/infra", "superseded", Trigger::Api, "", "user")
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        let active = store.get_active_scan("acme/infra").await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        let old = store.get_scan(first.id).await.unwrap();
        assert_eq!(old.status, ScanStatus::Canceled);
    }

    #[tokio::test]
    async fn clone_lock_release_requires_matching_owner() {
        let store = InMemoryStore::new();
        assert!(store.acquire_clone_lock("hash", "a", Duration::from_secs(60)).await.unwrap());
        assert!(store.release_clone_lock("hash", "b").await.is_err());
        assert!(store.release_clone_lock("hash", "a").await.is_ok());
    }

    #[tokio::test]
    async fn fail_scan_releases_the_repo_lock() {
        let store = InMemoryStore::new();
        let scan = store.start_scan("acme/infra", Trigger::Scheduled, "", "").await.unwrap();
        store.fail_scan(scan.id, "acme/infra", "boom").await.unwrap();
        assert!(store.get_active_scan("acme/infra").await.unwrap().is_none());
        store.start_scan("acme/infra", Trigger::Scheduled, "", "").await.unwrap();
    }
}
