//! Stack discoverer (§4.B): walks a materialized workspace and classifies
//! directories as Terraform or Terragrunt stacks.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{DiscoveryError, Result};
use crate::glob::IgnoreMatcher;

/// A discovered stack path, repo-root-relative and slash-separated.
/// The empty string denotes the workspace root itself.
pub type StackPath = String;

/// Validate an optional sub-scope per §4.B: non-empty, not `.`, not
/// absolute, and must not traverse above the workspace root.
fn validate_scope(scope: &str) -> Result<()> {
    if scope.is_empty() || scope == "." {
        return Err(DiscoveryError::InvalidScope(
            "scope must be non-empty and not '.'".into(),
        ));
    }
    if Path::new(scope).is_absolute() {
        return Err(DiscoveryError::InvalidScope("scope must be relative".into()));
    }
    if scope.split('/').any(|seg| seg == "..") {
        return Err(DiscoveryError::InvalidScope(
            "scope must not traverse above the workspace root".into(),
        ));
    }
    Ok(())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Depth-first walk collecting directories that contain a `terragrunt.hcl`
/// file and directories that contain at least one `*.tf` file, relative to
/// `root`. Pruned subtrees (ignored by `ignores`) are never descended into.
fn walk(
    root: &Path,
    scope_root: &Path,
    ignores: &IgnoreMatcher,
    terragrunt: &mut BTreeSet<StackPath>,
    terraform: &mut BTreeSet<StackPath>,
) -> Result<()> {
    let rel = scope_root.strip_prefix(root).unwrap_or(scope_root);
    let rel_str = to_slash(rel);
    if !rel_str.is_empty() && ignores.is_ignored(&rel_str) {
        return Ok(());
    }

    let entries = std::fs::read_dir(scope_root).map_err(|e| DiscoveryError::Io {
        path: scope_root.to_path_buf(),
        source: e,
    })?;

    let mut has_terragrunt_file = false;
    let mut has_tf_file = false;
    let mut subdirs: Vec<PathBuf> = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::Io {
            path: scope_root.to_path_buf(),
            source: e,
        })?;
        let file_type = entry.file_type().map_err(|e| DiscoveryError::Io {
            path: entry.path(),
            source: e,
        })?;
        if file_type.is_dir() {
            subdirs.push(entry.path());
        } else if file_type.is_file() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "terragrunt.hcl" {
                has_terragrunt_file = true;
            } else if name.ends_with(".tf") {
                has_tf_file = true;
            }
        }
    }

    if has_terragrunt_file {
        terragrunt.insert(rel_str.clone());
    }
    if has_tf_file {
        terraform.insert(rel_str.clone());
    }

    for subdir in subdirs {
        walk(root, &subdir, ignores, terragrunt, terraform)?;
    }
    Ok(())
}

/// Drop any path for which some other path in the set is a strict ancestor,
/// i.e. `other + "/"` is a prefix of it — those are modules, not stacks.
fn prune_shadowed(paths: BTreeSet<StackPath>) -> Vec<StackPath> {
    let sorted: Vec<StackPath> = paths.into_iter().collect();
    sorted
        .iter()
        .filter(|candidate| {
            !sorted.iter().any(|other| {
                other != *candidate && candidate.starts_with(&format!("{other}/"))
            })
        })
        .cloned()
        .collect()
}

/// Discover stacks under `workspace_root`, optionally restricted to `scope`
/// (a relative sub-path), applying `user_ignore_patterns` in addition to
/// the default ignore set.
pub fn discover_stacks(
    workspace_root: &Path,
    scope: Option<&str>,
    user_ignore_patterns: &[String],
) -> Result<Vec<StackPath>> {
    let scope_root = match scope {
        Some(s) => {
            validate_scope(s)?;
            workspace_root.join(s)
        }
        None => workspace_root.to_path_buf(),
    };

    let ignores = IgnoreMatcher::new(user_ignore_patterns);
    let mut terragrunt = BTreeSet::new();
    let mut terraform = BTreeSet::new();
    walk(workspace_root, &scope_root, &ignores, &mut terragrunt, &mut terraform)?;

    let scope_rel = to_slash(scope_root.strip_prefix(workspace_root).unwrap_or(&scope_root));
    let root_has_terragrunt = terragrunt.contains(&scope_rel);

    let selected = if root_has_terragrunt && !terragrunt.is_empty() {
        terragrunt
    } else {
        terragrunt.into_iter().chain(terraform).collect()
    };

    Ok(prune_shadowed(selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn discovers_plain_terraform_stacks() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/main.tf", "");
        write(tmp.path(), "envs/staging/main.tf", "");
        write(tmp.path(), "modules/vpc/main.tf", "");

        let stacks = discover_stacks(tmp.path(), None, &[]).unwrap();
        assert_eq!(
            stacks,
            vec!["envs/prod", "envs/staging", "modules/vpc"]
        );
    }

    #[test]
    fn terragrunt_root_precedence_drops_sibling_terraform() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "terragrunt.hcl", "");
        write(tmp.path(), "live/prod/terragrunt.hcl", "");
        write(tmp.path(), "modules/vpc/main.tf", "");

        let stacks = discover_stacks(tmp.path(), None, &[]).unwrap();
        assert_eq!(stacks, vec!["", "live/prod"]);
    }

    #[test]
    fn shadowed_stacks_are_pruned() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/terragrunt.hcl", "");
        write(tmp.path(), "envs/prod/nested/terragrunt.hcl", "");
        write(tmp.path(), "other/terragrunt.hcl", "");

        let stacks = discover_stacks(tmp.path(), None, &[]).unwrap();
        assert_eq!(stacks, vec!["envs/prod/nested", "other"]);
    }

    #[test]
    fn root_stack_does_not_shadow_children_by_literal_prefix_rule() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "terragrunt.hcl", "");
        write(tmp.path(), "envs/prod/terragrunt.hcl", "");

        let stacks = discover_stacks(tmp.path(), None, &[]).unwrap();
        assert_eq!(stacks, vec!["", "envs/prod"]);
    }

    #[test]
    fn ignored_subtree_is_pruned_entirely() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "app/main.tf", "");
        write(tmp.path(), "app/.terraform/modules/x/main.tf", "");

        let stacks = discover_stacks(tmp.path(), None, &[]).unwrap();
        assert_eq!(stacks, vec!["app"]);
    }

    #[test]
    fn invalid_scope_is_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_stacks(tmp.path(), Some(""), &[]).is_err());
        assert!(discover_stacks(tmp.path(), Some("."), &[]).is_err());
        assert!(discover_stacks(tmp.path(), Some("/abs"), &[]).is_err());
        assert!(discover_stacks(tmp.path(), Some("../escape"), &[]).is_err());
    }

    #[test]
    fn scoped_walk_restricts_to_subdirectory() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/main.tf", "");
        write(tmp.path(), "envs/staging/main.tf", "");

        let stacks = discover_stacks(tmp.path(), Some("envs/prod"), &[]).unwrap();
        assert_eq!(stacks, vec!["envs/prod"]);
    }
}
