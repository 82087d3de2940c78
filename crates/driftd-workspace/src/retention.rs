//! Retention sweeper (§4.D, §4.F step 7): removes old per-scan workspace
//! directories, preserving running scans and the N most-recent by mtime.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Sweep `{data_root}/workspaces/{repo_name}/*` directories, keeping the
/// `keep_recent` most-recently-modified non-running ones and any whose scan
/// id is in `running_scan_ids`. `keep_recent == 0` disables the sweep
/// entirely (nothing is removed), matching the config rule that a
/// non-positive retention value turns the sweep off.
pub async fn sweep(
    data_root: &Path,
    repo_name: &str,
    running_scan_ids: &[String],
    keep_recent: usize,
) -> std::io::Result<Vec<PathBuf>> {
    if keep_recent == 0 {
        return Ok(Vec::new());
    }

    let repo_dir = data_root.join("workspaces").join(repo_name);
    if !repo_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(&repo_dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            let mtime = entry.metadata().await?.modified()?;
            entries.push((entry.path(), entry.file_name().to_string_lossy().into_owned(), mtime));
        }
    }

    entries.sort_by(|a, b| b.2.cmp(&a.2));

    let mut removed = Vec::new();
    let mut kept = 0;
    for (path, scan_id, _) in entries {
        if running_scan_ids.iter().any(|id| id == &scan_id) {
            debug!(repo_name, scan_id, "retention: skipping running scan");
            continue;
        }
        if kept < keep_recent {
            kept += 1;
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(repo_name, scan_id, "retention: removed scan directory");
                removed.push(path);
            }
            Err(e) => {
                warn!(repo_name, scan_id, error = %e, "retention: failed to remove scan directory");
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn make_scan_dir(repo_dir: &Path, scan_id: &str) {
        tokio::fs::create_dir_all(repo_dir.join(scan_id).join("repo")).await.unwrap();
    }

    #[tokio::test]
    async fn keeps_n_most_recent_and_removes_the_rest() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("workspaces").join("acme/infra");
        for id in ["a", "b", "c", "d"] {
            make_scan_dir(&repo_dir, id).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let removed = sweep(tmp.path(), "acme/infra", &[], 2).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(repo_dir.join("c").exists());
        assert!(repo_dir.join("d").exists());
        assert!(!repo_dir.join("a").exists());
        assert!(!repo_dir.join("b").exists());
    }

    #[tokio::test]
    async fn never_removes_running_scans() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("workspaces").join("acme/infra");
        for id in ["a", "b", "c"] {
            make_scan_dir(&repo_dir, id).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let removed = sweep(tmp.path(), "acme/infra", &["a".to_string()], 1).await.unwrap();
        assert!(!removed.iter().any(|p| p.ends_with("a")));
        assert!(repo_dir.join("a").exists());
    }

    #[tokio::test]
    async fn missing_repo_dir_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let removed = sweep(tmp.path(), "no/such-repo", &[], 5).await.unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn running_scan_in_the_middle_of_the_mtime_order_does_not_consume_a_keep_slot() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("workspaces").join("acme/infra");
        for id in ["a", "b", "c", "d", "e"] {
            make_scan_dir(&repo_dir, id).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // mtime order (newest first): e, d, c, b, a. "d" is running but is
        // not the oldest entry, so it must not eat into the keep_recent=2
        // budget that should land on the two most-recent non-running scans.
        let removed = sweep(tmp.path(), "acme/infra", &["d".to_string()], 2).await.unwrap();

        assert!(repo_dir.join("d").exists());
        assert!(repo_dir.join("e").exists());
        assert!(repo_dir.join("c").exists());
        assert!(!repo_dir.join("b").exists());
        assert!(!repo_dir.join("a").exists());
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn zero_keep_recent_disables_the_sweep() {
        let tmp = TempDir::new().unwrap();
        let repo_dir = tmp.path().join("workspaces").join("acme/infra");
        for id in ["a", "b"] {
            make_scan_dir(&repo_dir, id).await;
        }

        let removed = sweep(tmp.path(), "acme/infra", &[], 0).await.unwrap();
        assert!(removed.is_empty());
        assert!(repo_dir.join("a").exists());
        assert!(repo_dir.join("b").exists());
    }
}
