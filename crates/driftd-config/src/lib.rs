//! KDL configuration parsing for driftd.
//!
//! This crate handles parsing of:
//! - System configuration (`data_dir`, worker timings, retention policy)
//! - The static repo list

mod kdl_util;

pub mod error;
pub mod repos;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use repos::parse_repo_list;
pub use system::{parse_system_config, SystemConfig, WorkerConfig, WorkspaceConfig};
