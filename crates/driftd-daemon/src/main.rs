//! driftd: scan orchestration daemon.

mod validate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use driftd_core::CoordinationStore;
use driftd_orchestrator::{CronScheduler, PassthroughSecretResolver, ScanOrchestrator, StaticRepoProvider};
use driftd_store::InMemoryStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--validate-config") {
        let path = args.get(2).context("--validate-config requires a path argument")?;
        validate::run(path);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let system_config_path = std::env::var("DRIFTD_SYSTEM_CONFIG").unwrap_or_else(|_| "/etc/driftd/system.kdl".to_string());
    let repos_config_path = std::env::var("DRIFTD_REPOS_CONFIG").unwrap_or_else(|_| "/etc/driftd/repos.kdl".to_string());

    let system_config_text = std::fs::read_to_string(&system_config_path)
        .with_context(|| format!("reading system config at {system_config_path}"))?;
    let system_config = driftd_config::parse_system_config(&system_config_text)?;

    let repos_text = std::fs::read_to_string(&repos_config_path)
        .with_context(|| format!("reading repo list at {repos_config_path}"))?;
    let repos = driftd_config::parse_repo_list(&repos_text)?;
    info!(count = repos.len(), "loaded repo list");

    let store: Arc<dyn CoordinationStore> = match std::env::var("DATABASE_URL") {
        Ok(url) if std::env::var("DRIFTD_NO_DB").as_deref() != Ok("1") => {
            info!("connecting to coordination database");
            let pool = sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(&url).await?;
            Arc::new(driftd_store::PgCoordinationStore::new(pool))
        }
        _ => {
            info!("DATABASE_URL unset or DRIFTD_NO_DB=1, using in-memory coordination store");
            Arc::new(InMemoryStore::new())
        }
    };

    let provider = Arc::new(StaticRepoProvider::new(repos));
    let secrets = Arc::new(PassthroughSecretResolver);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        store.clone(),
        secrets,
        PathBuf::from(&system_config.data_dir),
        Duration::from_secs(system_config.worker.renew_every),
        Duration::from_secs(system_config.worker.scan_max_age),
        // `<= 0` collapses to 0, which `driftd_workspace::retention::sweep` treats as "disabled".
        system_config.workspace.retention.max(0) as usize,
    ));

    let max_jitter_secs: u64 = std::env::var("DRIFTD_MAX_JITTER_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60);
    let scheduler = CronScheduler::new(
        orchestrator.clone(),
        store.clone(),
        provider,
        Duration::from_secs(max_jitter_secs),
        system_config.worker.retry_once,
    );
    scheduler.start().await?;

    info!("driftd running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping lock renewers");
    orchestrator.shutdown();

    Ok(())
}
