//! Workspace materializer (§4.D): fetch-or-clone a repository to a local
//! path, reset to the target ref, and return the resulting commit hash.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use driftd_core::{CoordinationStore, RepoConfig, ResourceId};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::canonicalize::clone_lock_key;
use crate::error::{MaterializeError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const CLONE_LOCK_TTL: Duration = Duration::from_secs(5 * 60);
const CLONE_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const CLONE_LOCK_MAX_ATTEMPTS: u32 = 20;

/// Resolved materialization output.
pub struct Materialized {
    pub workspace_path: PathBuf,
    pub commit_sha: String,
}

/// Per-scan path policy (§4.D): `{data_root}/workspaces/{repo_name}/{scan_id}/repo`.
pub fn scan_workspace_path(data_root: &Path, repo_name: &str, scan_id: ResourceId) -> PathBuf {
    data_root
        .join("workspaces")
        .join(repo_name)
        .join(scan_id.to_string())
        .join("repo")
}

fn cache_path(data_root: &Path, url_hash: &str) -> PathBuf {
    data_root.join("cache").join(url_hash)
}

fn auth_url(url: &str, access_token: Option<&str>) -> String {
    match (access_token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) => format!("https://{token}@{rest}"),
        _ => url.to_string(),
    }
}

fn redact(text: &str, access_token: Option<&str>) -> String {
    match access_token {
        Some(token) if !token.is_empty() => text.replace(token, "[REDACTED]"),
        _ => text.to_string(),
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
}

/// Acquire the clone lock for `url_hash`, retrying with a fixed backoff.
async fn acquire_clone_lock_with_retry(
    store: &dyn CoordinationStore,
    url_hash: &str,
    owner: &str,
) -> Result<()> {
    for attempt in 0..CLONE_LOCK_MAX_ATTEMPTS {
        if store.acquire_clone_lock(url_hash, owner, CLONE_LOCK_TTL).await? {
            return Ok(());
        }
        debug!(url_hash, attempt, "clone lock held by another owner, retrying");
        tokio::time::sleep(CLONE_LOCK_RETRY_INTERVAL).await;
    }
    Err(MaterializeError::CloneLockTimeout(url_hash.to_string()))
}

async fn ensure_cache(cache_dir: &Path, repo: &RepoConfig, access_token: Option<&str>) -> Result<()> {
    let url = auth_url(&repo.url, access_token);

    if cache_dir.exists() {
        info!(repo = %repo.name, "fetching into shared cache");
        let fetch = tokio::time::timeout(
            FETCH_TIMEOUT,
            run_git(
                cache_dir,
                &["fetch", "--force", "--no-tags", &url, "+refs/heads/*:refs/remotes/origin/*"],
            ),
        )
        .await
        .map_err(|_| MaterializeError::FetchFailed("timed out".into()))?
        .map_err(MaterializeError::Io)?;

        if !fetch.status.success() {
            let stderr = String::from_utf8_lossy(&fetch.stderr);
            if !stderr.contains("up to date") {
                return Err(MaterializeError::FetchFailed(redact(&stderr, access_token)));
            }
        }
        return Ok(());
    }

    info!(repo = %repo.name, "no shared cache yet, cloning fresh");
    tokio::fs::create_dir_all(cache_dir.parent().unwrap()).await?;
    let mut args = vec!["clone", "--depth", "1", "--single-branch"];
    if !repo.branch.is_empty() {
        args.push("--branch");
        args.push(&repo.branch);
    }
    args.push(&url);
    let cache_str = cache_dir.to_string_lossy().into_owned();
    args.push(&cache_str);

    let output = run_git(cache_dir.parent().unwrap(), &args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MaterializeError::CloneFailed(redact(&stderr, access_token)));
    }
    Ok(())
}

async fn clone_local(cache_dir: &Path, scan_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(scan_dir.parent().unwrap()).await?;
    let output = run_git(
        scan_dir.parent().unwrap(),
        &[
            "clone",
            "--local",
            "--no-hardlinks",
            cache_dir.to_str().unwrap(),
            scan_dir.to_str().unwrap(),
        ],
    )
    .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MaterializeError::CloneFailed(stderr.into_owned()));
    }
    Ok(())
}

/// Pulls the cache's `refs/remotes/origin/*` into the scan workspace's own
/// `refs/remotes/origin/*`. `clone_local`'s `git clone --local` only copies
/// `refs/heads/*` as it stood at clone time, so without this every scan
/// after the first would see the cache's state as of its initial clone.
async fn sync_scan_refs_from_cache(cache_dir: &Path, scan_dir: &Path) -> Result<()> {
    let cache_str = cache_dir.to_str().ok_or_else(|| MaterializeError::FetchFailed("non-utf8 cache path".into()))?;
    let output = run_git(
        scan_dir,
        &["fetch", "--no-tags", cache_str, "+refs/remotes/origin/*:refs/remotes/origin/*"],
    )
    .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MaterializeError::FetchFailed(stderr.into_owned()));
    }
    Ok(())
}

async fn rev_parse(dir: &Path, rev: &str) -> Option<String> {
    let output = run_git(dir, &["rev-parse", "--verify", rev]).await.ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// Resolve the target ref hash per §4.D's preference order, with the
/// scan's requested ref (if non-empty) tried ahead of the configured
/// branch so the `commit` field in the data model has observable effect.
async fn resolve_target_ref(scan_dir: &Path, requested_ref: &str, branch: &str) -> Result<String> {
    let mut candidates = Vec::new();
    if !requested_ref.is_empty() {
        candidates.push(requested_ref.to_string());
    }
    if !branch.is_empty() {
        candidates.push(format!("origin/{branch}"));
    }
    candidates.push("origin/HEAD".to_string());
    candidates.push("origin/main".to_string());
    candidates.push("origin/master".to_string());

    for candidate in &candidates {
        if let Some(hash) = rev_parse(scan_dir, candidate).await {
            return Ok(hash);
        }
    }

    // The local-HEAD fallback only applies when the repo has no configured
    // branch at all; a configured branch that fails to resolve remotely
    // must fail loudly rather than silently reset to whatever happens to
    // be checked out locally.
    if branch.is_empty() {
        if let Some(hash) = rev_parse(scan_dir, "HEAD").await {
            return Ok(hash);
        }
    }

    Err(MaterializeError::RefResolutionFailed(format!(
        "no candidate ref resolved (tried {:?})",
        candidates
    )))
}

async fn hard_reset(scan_dir: &Path, commit_sha: &str) -> Result<()> {
    let output = run_git(scan_dir, &["reset", "--hard", commit_sha]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MaterializeError::ResetFailed(stderr.into_owned()));
    }
    Ok(())
}

/// Materialize a workspace snapshot for `repo` at `scan_id`, resetting to
/// `requested_ref` if non-empty. Any failure removes the partial per-scan
/// directory before returning.
pub async fn materialize(
    store: &dyn CoordinationStore,
    data_root: &Path,
    repo: &RepoConfig,
    access_token: Option<&str>,
    scan_id: ResourceId,
    requested_ref: &str,
) -> Result<Materialized> {
    let url_hash = clone_lock_key(&repo.url).map_err(|e| MaterializeError::InvalidUrl(e.to_string()))?;
    let owner = scan_id.to_string();

    acquire_clone_lock_with_retry(store, &url_hash, &owner).await?;
    let result = materialize_locked(store, data_root, repo, access_token, scan_id, requested_ref, &url_hash).await;

    if let Err(e) = store.release_clone_lock(&url_hash, &owner).await {
        warn!(url_hash = %url_hash, error = %e, "failed to release clone lock");
    }

    result
}

async fn materialize_locked(
    _store: &dyn CoordinationStore,
    data_root: &Path,
    repo: &RepoConfig,
    access_token: Option<&str>,
    scan_id: ResourceId,
    requested_ref: &str,
    url_hash: &str,
) -> Result<Materialized> {
    let cache_dir = cache_path(data_root, url_hash);
    let scan_dir = scan_workspace_path(data_root, &repo.name, scan_id);

    let outcome = async {
        ensure_cache(&cache_dir, repo, access_token).await?;
        clone_local(&cache_dir, &scan_dir).await?;
        sync_scan_refs_from_cache(&cache_dir, &scan_dir).await?;
        let commit_sha = resolve_target_ref(&scan_dir, requested_ref, &repo.branch).await?;
        hard_reset(&scan_dir, &commit_sha).await?;
        Ok::<String, MaterializeError>(commit_sha)
    }
    .await;

    match outcome {
        Ok(commit_sha) => Ok(Materialized { workspace_path: scan_dir, commit_sha }),
        Err(e) => {
            if scan_dir.exists() {
                let _ = tokio::fs::remove_dir_all(&scan_dir).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_workspace_path_follows_path_policy() {
        let id = ResourceId::new();
        let path = scan_workspace_path(Path::new("/data"), "acme/infra", id);
        assert_eq!(
            path,
            Path::new("/data/workspaces/acme/infra").join(id.to_string()).join("repo")
        );
    }

    #[test]
    fn auth_url_injects_token_for_https_only() {
        assert_eq!(
            auth_url("https://github.com/acme/infra.git", Some("tok")),
            "https://tok@github.com/acme/infra.git"
        );
        assert_eq!(
            auth_url("git@github.com:acme/infra.git", Some("tok")),
            "git@github.com:acme/infra.git"
        );
    }

    #[test]
    fn redact_strips_token_from_error_text() {
        let msg = "fatal: authentication failed for https://tok@github.com/acme/infra.git";
        assert!(!redact(msg, Some("tok")).contains("tok@"));
    }
}
