//! Stack discovery and Terraform/Terragrunt version detection.
//!
//! - [`glob`]: `**`-capable ignore pattern matching.
//! - [`discover`]: walks a workspace and classifies stacks, pruning shadowed ones.
//! - [`version`]: reads per-stack/root version files and collapses uniform sets.

pub mod discover;
pub mod error;
pub mod glob;
pub mod version;

pub use discover::{discover_stacks, StackPath};
pub use error::{DiscoveryError, Result};
pub use glob::IgnoreMatcher;
pub use version::{detect_versions, DetectedVersions};
