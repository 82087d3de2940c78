//! System configuration parsing.
//!
//! Expected shape:
//!
//! ```kdl
//! data_dir "/var/lib/driftd"
//!
//! worker {
//!     lock_ttl 300
//!     scan_max_age 3600
//!     renew_every 30
//!     retry_once true
//! }
//!
//! workspace {
//!     retention 5
//! }
//! ```

use kdl::KdlDocument;

use crate::kdl_util::{child, first_arg_bool, required_int, required_str};
use crate::{ConfigError, ConfigResult};

/// System-wide configuration (§6 "Config surface").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    pub data_dir: String,
    pub worker: WorkerConfig,
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Seconds the repo lock is held for before it's considered stale.
    pub lock_ttl: u64,
    /// Seconds after which a running scan is force-failed.
    pub scan_max_age: u64,
    /// Seconds between lock-renewer ticks.
    pub renew_every: u64,
    /// Whether enqueued stack work items get one retry.
    pub retry_once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Number of most-recent scan directories retained per repo; `<= 0` disables the sweep.
    pub retention: i64,
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let data_dir = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "data_dir")
        .ok_or_else(|| ConfigError::MissingField("data_dir".to_string()))
        .and_then(|n| required_str(n, "data_dir"))?;

    let worker_node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "worker")
        .ok_or_else(|| ConfigError::MissingField("worker".to_string()))?;
    let worker = WorkerConfig {
        lock_ttl: parse_u64(child(worker_node, "lock_ttl"), "worker.lock_ttl")?,
        scan_max_age: parse_u64(child(worker_node, "scan_max_age"), "worker.scan_max_age")?,
        renew_every: parse_u64(child(worker_node, "renew_every"), "worker.renew_every")?,
        retry_once: child(worker_node, "retry_once").and_then(first_arg_bool).unwrap_or(false),
    };

    let workspace_node = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "workspace")
        .ok_or_else(|| ConfigError::MissingField("workspace".to_string()))?;
    let workspace = WorkspaceConfig {
        retention: child(workspace_node, "retention")
            .map(|n| required_int(n, "workspace.retention"))
            .transpose()?
            .unwrap_or(0),
    };

    Ok(SystemConfig { data_dir, worker, workspace })
}

fn parse_u64(node: Option<&kdl::KdlNode>, field: &str) -> ConfigResult<u64> {
    let node = node.ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    let value = required_int(node, field)?;
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("must be non-negative, got {value}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        data_dir "/var/lib/driftd"

        worker {
            lock_ttl 300
            scan_max_age 3600
            renew_every 30
            retry_once true
        }

        workspace {
            retention 5
        }
    "#;

    #[test]
    fn parses_full_config() {
        let cfg = parse_system_config(SAMPLE).unwrap();
        assert_eq!(cfg.data_dir, "/var/lib/driftd");
        assert_eq!(cfg.worker.lock_ttl, 300);
        assert_eq!(cfg.worker.scan_max_age, 3600);
        assert_eq!(cfg.worker.renew_every, 30);
        assert!(cfg.worker.retry_once);
        assert_eq!(cfg.workspace.retention, 5);
    }

    #[test]
    fn retry_once_defaults_to_false() {
        let kdl = r#"
            data_dir "/tmp/driftd"
            worker {
                lock_ttl 60
                scan_max_age 600
                renew_every 10
            }
            workspace { retention 3 }
        "#;
        assert!(!parse_system_config(kdl).unwrap().worker.retry_once);
    }

    #[test]
    fn negative_retention_disables_sweep_but_still_parses() {
        let kdl = r#"
            data_dir "/tmp/driftd"
            worker { lock_ttl 60 scan_max_age 600 renew_every 10 }
            workspace { retention -1 }
        "#;
        assert_eq!(parse_system_config(kdl).unwrap().workspace.retention, -1);
    }

    #[test]
    fn missing_data_dir_is_an_error() {
        let kdl = r#"
            worker { lock_ttl 60 scan_max_age 600 renew_every 10 }
            workspace { retention 3 }
        "#;
        assert!(matches!(parse_system_config(kdl), Err(ConfigError::MissingField(f)) if f == "data_dir"));
    }

    #[test]
    fn missing_worker_block_is_an_error() {
        let kdl = r#"data_dir "/tmp/driftd" workspace { retention 3 }"#;
        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn malformed_kdl_is_a_parse_error() {
        let kdl = "data_dir \"unterminated";
        assert!(matches!(parse_system_config(kdl), Err(ConfigError::Parse(_))));
    }
}
