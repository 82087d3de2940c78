//! Cron scheduler (§4.G): maintains one scheduled entry per repo with a
//! non-empty schedule, firing repo-scoped scan starts with deterministic
//! per-repo jitter to avoid thundering herds.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use driftd_core::{CoordinationStore, RepoConfig, RepoProvider, StackWorkItem, Trigger};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::ScanOrchestrator;

struct CronEntry {
    handle: JoinHandle<()>,
}

/// Deterministic per-repo jitter: `hash(repo_name) mod max_jitter`. An
/// empty name always yields zero offset.
pub fn jitter_offset(repo_name: &str, max_jitter: Duration) -> Duration {
    if repo_name.is_empty() || max_jitter.is_zero() {
        return Duration::ZERO;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    repo_name.hash(&mut hasher);
    let millis = max_jitter.as_millis().max(1) as u64;
    Duration::from_millis(hasher.finish() % millis)
}

/// The `cron` crate expects a leading seconds field; this spec's schedule
/// strings are the traditional 5-field form, so a `0` seconds field is
/// prefixed before parsing.
fn parse_schedule(expr: &str) -> std::result::Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {expr}"))
}

pub struct CronScheduler {
    orchestrator: Arc<ScanOrchestrator>,
    store: Arc<dyn CoordinationStore>,
    provider: Arc<dyn RepoProvider>,
    max_jitter: Duration,
    retry_once: bool,
    entries: std::sync::Mutex<HashMap<String, CronEntry>>,
}

impl CronScheduler {
    pub fn new(
        orchestrator: Arc<ScanOrchestrator>,
        store: Arc<dyn CoordinationStore>,
        provider: Arc<dyn RepoProvider>,
        max_jitter: Duration,
        retry_once: bool,
    ) -> Self {
        Self {
            orchestrator,
            store,
            provider,
            max_jitter,
            retry_once,
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Registers an entry for every repo whose config has a non-empty
    /// schedule. An invalid cron expression aborts startup.
    pub async fn start(&self) -> Result<()> {
        for repo in self.provider.list().await? {
            if !repo.schedule.is_empty() {
                self.register(repo)?;
            }
        }
        Ok(())
    }

    pub fn on_repo_added(&self, repo: RepoConfig) {
        if repo.schedule.is_empty() {
            return;
        }
        if let Err(e) = self.register(repo.clone()) {
            warn!(repo = %repo.name, error = %e, "invalid cron schedule on add, ignoring");
        }
    }

    pub fn on_repo_updated(&self, repo: RepoConfig) {
        self.on_repo_deleted(&repo.name);
        if !repo.schedule.is_empty() {
            if let Err(e) = self.register(repo.clone()) {
                warn!(repo = %repo.name, error = %e, "invalid cron schedule on update, ignoring");
            }
        }
    }

    pub fn on_repo_deleted(&self, repo_name: &str) {
        if let Some(entry) = self.entries.lock().unwrap().remove(repo_name) {
            entry.handle.abort();
        }
    }

    fn register(&self, repo: RepoConfig) -> Result<()> {
        let schedule = parse_schedule(&repo.schedule)
            .map_err(|source| OrchestratorError::InvalidCron { expr: repo.schedule.clone(), source })?;

        let jitter = jitter_offset(&repo.name, self.max_jitter);
        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();
        let repo_name = repo.name.clone();
        let retry_once = self.retry_once;

        let handle = tokio::spawn(async move {
            loop {
                let next = match schedule.upcoming(Utc).next() {
                    Some(t) => t,
                    None => {
                        error!(repo = %repo_name, "cron schedule has no upcoming fire time");
                        return;
                    }
                };
                let now = Utc::now();
                let until_fire = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(until_fire + jitter).await;

                info!(repo = %repo_name, "cron tick");
                fire(&orchestrator, &store, &repo, retry_once).await;
            }
        });

        let mut entries = self.entries.lock().unwrap();
        if let Some(old) = entries.insert(repo.name.clone(), CronEntry { handle }) {
            old.handle.abort();
        }
        Ok(())
    }
}

/// On tick: start a scan with trigger `scheduled` and enqueue one work
/// item per discovered stack, tolerating partial enqueue failures.
async fn fire(orchestrator: &ScanOrchestrator, store: &Arc<dyn CoordinationStore>, repo: &RepoConfig, retry_once: bool) {
    let (scan, stacks) = match orchestrator.start_scan(repo, Trigger::Scheduled, "", "").await {
        Ok(result) => result,
        Err(e) => {
            warn!(repo = %repo.name, error = %e, "scheduled scan failed to start");
            return;
        }
    };

    let max_retries = if retry_once { 1 } else { 0 };
    for stack_path in stacks {
        let item = StackWorkItem {
            scan_id: scan.id,
            repo_name: repo.name.clone(),
            repo_url: repo.url.clone(),
            stack_path,
            max_retries,
            trigger: Trigger::Scheduled,
        };
        if let Err(e) = store.enqueue(item).await {
            warn!(repo = %repo.name, scan_id = %scan.id, error = %e, "failed to enqueue stack work item");
            if let Err(mark_err) = store.mark_scan_enqueue_failed(scan.id).await {
                warn!(repo = %repo.name, error = %mark_err, "failed to record enqueue failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let max = Duration::from_secs(60);
        let a = jitter_offset("acme/infra", max);
        let b = jitter_offset("acme/infra", max);
        assert_eq!(a, b);
        assert!(a < max);
    }

    #[test]
    fn empty_repo_name_has_zero_jitter() {
        assert_eq!(jitter_offset("", Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn zero_max_jitter_is_always_zero() {
        assert_eq!(jitter_offset("acme/infra", Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn five_field_schedule_parses_with_injected_seconds() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
        assert!(parse_schedule("not a cron expression").is_err());
    }
}
