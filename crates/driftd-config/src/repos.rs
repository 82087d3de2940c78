//! Static repo list parsing (§6 "Config surface", per-repo fields).
//!
//! Expected shape:
//!
//! ```kdl
//! repo "acme/infra" {
//!     url "https://github.com/acme/infra.git"
//!     branch "main"
//!     schedule "*/15 * * * *"
//!     ignore_paths "vendor/**" "node_modules/**"
//!     cancel_inflight_enabled true
//!     auth secret_name="acme-infra-token"
//! }
//! ```

use kdl::KdlDocument;

use driftd_core::{AuthDescriptor, RepoConfig};

use crate::kdl_util::{args_str, child, first_arg_bool, first_arg_str, prop_str, required_str};
use crate::{ConfigError, ConfigResult};

/// Parse a static repo list from KDL text. Each top-level `repo` node
/// becomes one [`RepoConfig`]; duplicate names are rejected.
pub fn parse_repo_list(kdl: &str) -> ConfigResult<Vec<RepoConfig>> {
    let doc: KdlDocument = kdl.parse()?;

    let mut seen = std::collections::HashSet::new();
    let mut repos = Vec::new();

    for node in doc.nodes().iter().filter(|n| n.name().value() == "repo") {
        let name = required_str(node, "repo name")?;
        if !seen.insert(name.clone()) {
            return Err(ConfigError::Duplicate(name));
        }

        let url = child(node, "url")
            .map(|n| required_str(n, "url"))
            .transpose()?
            .ok_or_else(|| ConfigError::MissingField(format!("repo '{name}'.url")))?;

        let branch = child(node, "branch").and_then(first_arg_str).unwrap_or_default();
        let schedule = child(node, "schedule").and_then(first_arg_str).unwrap_or_default();
        let ignore_paths = child(node, "ignore_paths").map(args_str).unwrap_or_default();
        let cancel_inflight_enabled = child(node, "cancel_inflight_enabled").and_then(first_arg_bool).unwrap_or(false);
        let auth = child(node, "auth")
            .map(|n| AuthDescriptor { secret_name: prop_str(n, "secret_name") })
            .unwrap_or_default();

        repos.push(RepoConfig { name, url, branch, ignore_paths, schedule, cancel_inflight_enabled, auth });
    }

    Ok(repos)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        repo "acme/infra" {
            url "https://github.com/acme/infra.git"
            branch "main"
            schedule "*/15 * * * *"
            ignore_paths "vendor/**" "node_modules/**"
            cancel_inflight_enabled true
            auth secret_name="acme-infra-token"
        }

        repo "acme/edge" {
            url "git@github.com:acme/edge.git"
        }
    "#;

    #[test]
    fn parses_full_and_minimal_repos() {
        let repos = parse_repo_list(SAMPLE).unwrap();
        assert_eq!(repos.len(), 2);

        let infra = &repos[0];
        assert_eq!(infra.name, "acme/infra");
        assert_eq!(infra.url, "https://github.com/acme/infra.git");
        assert_eq!(infra.branch, "main");
        assert_eq!(infra.schedule, "*/15 * * * *");
        assert_eq!(infra.ignore_paths, vec!["vendor/**", "node_modules/**"]);
        assert!(infra.cancel_inflight_enabled);
        assert_eq!(infra.auth.secret_name.as_deref(), Some("acme-infra-token"));

        let edge = &repos[1];
        assert_eq!(edge.branch, "");
        assert!(edge.ignore_paths.is_empty());
        assert!(!edge.cancel_inflight_enabled);
        assert!(edge.auth.secret_name.is_none());
    }

    #[test]
    fn duplicate_repo_name_is_rejected() {
        let kdl = r#"
            repo "acme/infra" { url "https://github.com/acme/infra.git" }
            repo "acme/infra" { url "https://github.com/acme/infra-2.git" }
        "#;
        assert!(matches!(parse_repo_list(kdl), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn missing_url_is_an_error() {
        let kdl = r#"repo "acme/infra" { branch "main" }"#;
        assert!(parse_repo_list(kdl).is_err());
    }

    #[test]
    fn empty_document_yields_empty_list() {
        assert!(parse_repo_list("").unwrap().is_empty());
    }
}
