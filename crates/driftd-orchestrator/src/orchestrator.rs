//! Scan orchestrator (§4.F): composes the glob matcher, stack discoverer,
//! version detector, workspace materializer, and coordination store for
//! the full scan-start lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use driftd_core::{CoordinationStore, RepoConfig, ResourceId, Scan, ScanEvent, ScanStatus, Trigger};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};

/// Resolves auth material for a repo into an access token. The real
/// secret store lives outside this core; this is the seam it's invoked
/// through.
#[async_trait::async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, secret_name: &str) -> Option<String>;
}

/// A resolver that treats the configured secret name as the token
/// verbatim. Used when the daemon is wired without a real secret store
/// (local dev, tests).
pub struct PassthroughSecretResolver;

#[async_trait::async_trait]
impl SecretResolver for PassthroughSecretResolver {
    async fn resolve(&self, secret_name: &str) -> Option<String> {
        Some(secret_name.to_string())
    }
}

pub struct ScanOrchestrator {
    store: Arc<dyn CoordinationStore>,
    secrets: Arc<dyn SecretResolver>,
    data_root: PathBuf,
    renew_every: Duration,
    scan_max_age: Duration,
    retention_keep: usize,
    shutdown: watch::Sender<bool>,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        secrets: Arc<dyn SecretResolver>,
        data_root: PathBuf,
        renew_every: Duration,
        scan_max_age: Duration,
        retention_keep: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self { store, secrets, data_root, renew_every, scan_max_age, retention_keep, shutdown }
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Stop all background lock-renewer tasks spawned by this orchestrator.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Public contract (§4.F): `StartScan(repo_config, trigger, commit, actor)`.
    pub async fn start_scan(
        &self,
        repo: &RepoConfig,
        trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> Result<(Scan, Vec<String>)> {
        let scan = self.acquire_scan(repo, trigger, commit, actor).await?;

        self.store.publish_event(&repo.name, ScanEvent::scan_update(&scan)).await?;

        let renew_handle = self.spawn_lock_renewer(repo.name.clone(), scan.id);

        match self.run_scan_steps(repo, &scan, commit).await {
            Ok(stacks) => {
                renew_handle.abort();
                Ok((scan, stacks))
            }
            Err(e) => {
                renew_handle.abort();
                if let Err(fail_err) = self.store.fail_scan(scan.id, &repo.name, &e.to_string()).await {
                    warn!(repo = %repo.name, error = %fail_err, "failed to mark scan as failed");
                }
                Err(e)
            }
        }
    }

    /// Step 1: acquire the repo lock, pre-empting an inflight scan if the
    /// new trigger outranks it and the repo allows cancellation.
    async fn acquire_scan(
        &self,
        repo: &RepoConfig,
        trigger: Trigger,
        commit: &str,
        actor: &str,
    ) -> Result<Scan> {
        match self.store.start_scan(&repo.name, trigger, commit, actor).await {
            Ok(scan) => Ok(scan),
            Err(driftd_core::Error::RepoLocked(reason)) if repo.cancel_inflight_enabled => {
                let active = self.store.get_active_scan(&repo.name).await?;
                match active {
                    Some(active) if trigger.priority() >= active.trigger.priority() => {
                        info!(repo = %repo.name, old = %active.id, "pre-empting inflight scan");
                        Ok(self
                            .store
                            .cancel_and_start_scan(
                                active.id,
                                &repo.name,
                                "superseded by higher-or-equal priority trigger",
                                trigger,
                                commit,
                                actor,
                            )
                            .await?)
                    }
                    _ => Err(OrchestratorError::Store(driftd_core::Error::RepoLocked(reason))),
                }
            }
            Err(e) => Err(OrchestratorError::Store(e)),
        }
    }

    /// Steps 4-10: auth resolution, materialize, discover, detect versions.
    async fn run_scan_steps(&self, repo: &RepoConfig, scan: &Scan, commit: &str) -> Result<Vec<String>> {
        let access_token = match &repo.auth.secret_name {
            Some(name) => self.secrets.resolve(name).await,
            None => None,
        };

        let materialized = driftd_workspace::materialize(
            self.store.as_ref(),
            &self.data_root,
            repo,
            access_token.as_deref(),
            scan.id,
            commit,
        )
        .await?;

        self.store
            .set_scan_workspace(
                scan.id,
                &materialized.workspace_path.to_string_lossy(),
                &materialized.commit_sha,
            )
            .await?;

        self.spawn_retention_sweep(repo.name.clone());

        let stacks = driftd_discovery::discover_stacks(&materialized.workspace_path, None, &repo.ignore_paths)?;
        if stacks.is_empty() {
            return Err(OrchestratorError::NoStacksDiscovered);
        }

        let detected = driftd_discovery::detect_versions(&materialized.workspace_path, &stacks);
        self.store
            .set_scan_versions(
                scan.id,
                driftd_core::Versions {
                    default_terraform: detected.default_terraform,
                    default_terragrunt: detected.default_terragrunt,
                    stack_terraform: detected.stack_terraform,
                    stack_terragrunt: detected.stack_terragrunt,
                },
            )
            .await?;

        self.store.set_scan_total(scan.id, stacks.len() as u32).await?;

        Ok(stacks)
    }

    fn spawn_retention_sweep(&self, repo_name: String) {
        let store = self.store.clone();
        let data_root = self.data_root.clone();
        let keep_recent = self.retention_keep;
        tokio::spawn(async move {
            let running = match store.get_active_scan(&repo_name).await {
                Ok(Some(scan)) => vec![scan.id.to_string()],
                _ => vec![],
            };
            match driftd_workspace::retention::sweep(&data_root, &repo_name, &running, keep_recent).await {
                Ok(removed) if !removed.is_empty() => {
                    info!(repo = %repo_name, count = removed.len(), "retention sweep removed old scan directories");
                }
                Ok(_) => {}
                Err(e) => warn!(repo = %repo_name, error = %e, "retention sweep failed"),
            }
        });
    }

    /// Step 3: background lock-renewer bound to the orchestrator's lifetime.
    fn spawn_lock_renewer(&self, repo_name: String, scan_id: ResourceId) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let renew_every = self.renew_every;
        let scan_max_age = self.scan_max_age;
        let mut shutdown = self.shutdown.subscribe();
        let started_at = std::time::Instant::now();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(renew_every) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }

                match store.get_scan(scan_id).await {
                    Ok(scan) if scan.status.is_terminal() => return,
                    Err(_) => return,
                    _ => {}
                }

                if started_at.elapsed() >= scan_max_age {
                    warn!(%scan_id, repo = %repo_name, "scan exceeded max age, forcing failure");
                    let _ = store.fail_scan(scan_id, &repo_name, "exceeded scan_max_age").await;
                    return;
                }

                if let Err(e) = store.renew_repo_lock(&repo_name, scan_id, scan_max_age).await {
                    warn!(%scan_id, repo = %repo_name, error = %e, "lock renewal failed, stopping renewer");
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftd_store::InMemoryStore;

    fn repo(name: &str, cancel_inflight: bool) -> RepoConfig {
        RepoConfig {
            name: name.to_string(),
            url: format!("https://github.com/acme/{name}.git"),
            branch: String::new(),
            ignore_paths: vec![],
            schedule: String::new(),
            cancel_inflight_enabled: cancel_inflight,
            auth: Default::default(),
        }
    }

    fn orchestrator(store: Arc<dyn CoordinationStore>, data_root: PathBuf) -> ScanOrchestrator {
        ScanOrchestrator::new(
            store,
            Arc::new(PassthroughSecretResolver),
            data_root,
            Duration::from_millis(20),
            Duration::from_secs(3600),
            5,
        )
    }

    #[tokio::test]
    async fn a_failed_scan_releases_its_repo_lock() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let repo_cfg = repo("acme/infra", false);
        let scan = store.start_scan(&repo_cfg.name, Trigger::Manual, "", "tester").await.unwrap();
        store.fail_scan(scan.id, &repo_cfg.name, "discovery error").await.unwrap();

        let active = store.get_active_scan(&repo_cfg.name).await.unwrap();
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn second_higher_priority_trigger_preempts_when_cancel_inflight_enabled() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let repo_cfg = repo("acme/infra", true);

        let first = store.start_scan(&repo_cfg.name, Trigger::Scheduled, "", "").await.unwrap();
        let orch = orchestrator(store.clone(), PathBuf::from("/tmp/driftd-test"));

        let acquired = orch.acquire_scan(&repo_cfg, Trigger::Api, "", "operator").await.unwrap();
        assert_ne!(acquired.id, first.id);

        let old = store.get_scan(first.id).await.unwrap();
        assert_eq!(old.status, ScanStatus::Canceled);
    }

    #[tokio::test]
    async fn lower_priority_trigger_is_rejected_even_with_cancel_inflight_enabled() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
        let repo_cfg = repo("acme/infra", true);

        store.start_scan(&repo_cfg.name, Trigger::Api, "", "").await.unwrap();
        let orch = orchestrator(store.clone(), PathBuf::from("/tmp/driftd-test"));

        let err = orch.acquire_scan(&repo_cfg, Trigger::Scheduled, "", "cron").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Store(driftd_core::Error::RepoLocked(_))));
    }
}
