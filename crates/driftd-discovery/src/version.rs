//! Version detector (§4.C): per-stack and root `.terraform-version` /
//! `.terragrunt-version` resolution, with a collapse rule for uniform sets.

use std::collections::HashMap;
use std::path::Path;

const TF_VERSION_FILE: &str = ".terraform-version";
const TG_VERSION_FILE: &str = ".terragrunt-version";

/// Result of version detection, ready to hand to `CoordinationStore::set_scan_versions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedVersions {
    pub default_terraform: String,
    pub default_terragrunt: String,
    pub stack_terraform: HashMap<String, String>,
    pub stack_terragrunt: HashMap<String, String>,
}

/// Read a version file's first line, trimmed. Missing file => empty string.
/// Never fails: any read error is treated the same as "absent".
fn read_version_file(dir: &Path, file_name: &str) -> String {
    match std::fs::read_to_string(dir.join(file_name)) {
        Ok(contents) => contents.lines().next().unwrap_or("").trim().to_string(),
        Err(_) => String::new(),
    }
}

fn stack_or_root(workspace_root: &Path, stack: &str, file_name: &str, root_value: &str) -> String {
    let stack_dir = if stack.is_empty() {
        workspace_root.to_path_buf()
    } else {
        workspace_root.join(stack)
    };
    let value = read_version_file(&stack_dir, file_name);
    if value.is_empty() {
        root_value.to_string()
    } else {
        value
    }
}

/// Collapse a per-stack version map: if exactly one non-empty value occurs
/// across all stacks, it becomes the default and the map is cleared.
/// Otherwise the map is returned unchanged (entries with an empty value
/// dropped, since an empty value just means "undetermined").
fn collapse(per_stack: HashMap<String, String>) -> (String, HashMap<String, String>) {
    let distinct: std::collections::HashSet<&str> = per_stack
        .values()
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .collect();
    if distinct.len() == 1 {
        let only = distinct.into_iter().next().unwrap().to_string();
        (only, HashMap::new())
    } else {
        let filtered = per_stack
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();
        (String::new(), filtered)
    }
}

/// Detect Terraform/Terragrunt versions for every stack in `stacks`,
/// relative to `workspace_root`.
pub fn detect_versions(workspace_root: &Path, stacks: &[String]) -> DetectedVersions {
    let root_tf = read_version_file(workspace_root, TF_VERSION_FILE);
    let root_tg = read_version_file(workspace_root, TG_VERSION_FILE);

    let mut stack_tf = HashMap::new();
    let mut stack_tg = HashMap::new();
    for stack in stacks {
        let tf = stack_or_root(workspace_root, stack, TF_VERSION_FILE, &root_tf);
        if !tf.is_empty() {
            stack_tf.insert(stack.clone(), tf);
        }
        let tg = stack_or_root(workspace_root, stack, TG_VERSION_FILE, &root_tg);
        if !tg.is_empty() {
            stack_tg.insert(stack.clone(), tg);
        }
    }

    let (mut default_tf, mut per_stack_tf) = collapse(stack_tf);
    let (mut default_tg, mut per_stack_tg) = collapse(stack_tg);

    // Root file overrides the collapsed default; matching per-stack entries drop out.
    if !root_tf.is_empty() {
        default_tf = root_tf;
        per_stack_tf.retain(|_, v| v != &default_tf);
    }
    if !root_tg.is_empty() {
        default_tg = root_tg;
        per_stack_tg.retain(|_, v| v != &default_tg);
    }

    DetectedVersions {
        default_terraform: default_tf,
        default_terragrunt: default_tg,
        stack_terraform: per_stack_tf,
        stack_terragrunt: per_stack_tg,
    }
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
    fn missing_files_produce_empty_versions() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/main.tf", "");
        let v = detect_versions(tmp.path(), &["envs/prod".to_string()]);
        assert_eq!(v, DetectedVersions::default());
    }

    #[test]
    fn uniform_per_stack_versions_collapse_to_default() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/.terraform-version", "1.7.0\n");
        write(tmp.path(), "envs/staging/.terraform-version", "1.7.0\n");

        let v = detect_versions(
            tmp.path(),
            &["envs/prod".to_string(), "envs/staging".to_string()],
        );
        assert_eq!(v.default_terraform, "1.7.0");
        assert!(v.stack_terraform.is_empty());
    }

    #[test]
    fn divergent_per_stack_versions_stay_per_stack() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "envs/prod/.terraform-version", "1.7.0\n");
        write(tmp.path(), "envs/staging/.terraform-version", "1.6.0\n");

        let v = detect_versions(
            tmp.path(),
            &["envs/prod".to_string(), "envs/staging".to_string()],
        );
        assert_eq!(v.default_terraform, "");
        assert_eq!(v.stack_terraform.get("envs/prod").unwrap(), "1.7.0");
        assert_eq!(v.stack_terraform.get("envs/staging").unwrap(), "1.6.0");
    }

    #[test]
    fn root_file_overrides_default_and_drops_matching_entries() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".terraform-version", "1.7.0\n");
        write(tmp.path(), "envs/prod/.terraform-version", "1.7.0\n");
        write(tmp.path(), "envs/staging/.terraform-version", "1.6.0\n");

        let v = detect_versions(
            tmp.path(),
            &["envs/prod".to_string(), "envs/staging".to_string()],
        );
        assert_eq!(v.default_terraform, "1.7.0");
        assert_eq!(v.stack_terraform.len(), 1);
        assert_eq!(v.stack_terraform.get("envs/staging").unwrap(), "1.6.0");
        assert!(!v.stack_terraform.contains_key("envs/prod"));
    }

    #[test]
    fn root_file_overriding_uniform_per_stack_set_loses_per_stack_detail() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".terraform-version", "1.8.0\n");
        write(tmp.path(), "envs/prod/.terraform-version", "1.7.0\n");
        write(tmp.path(), "envs/staging/.terraform-version", "1.7.0\n");

        let v = detect_versions(
            tmp.path(),
            &["envs/prod".to_string(), "envs/staging".to_string()],
        );
        assert_eq!(v.default_terraform, "1.8.0");
        assert!(v.stack_terraform.is_empty());
    }

    #[test]
    fn stack_falls_back_to_root_file_when_absent() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".terraform-version", "1.9.0\n");
        write(tmp.path(), "envs/prod/main.tf", "");

        let v = detect_versions(tmp.path(), &["envs/prod".to_string()]);
        assert_eq!(v.default_terraform, "1.9.0");
        assert!(v.stack_terraform.is_empty());
    }

    #[test]
    fn root_stack_reads_workspace_root_directly() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".terraform-version", "1.9.0\n");
        let v = detect_versions(tmp.path(), &[String::new()]);
        assert_eq!(v.default_terraform, "1.9.0");
    }
}
