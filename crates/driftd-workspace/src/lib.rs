//! Workspace materializer, URL canonicalizer, and retention sweeper.

pub mod canonicalize;
pub mod error;
pub mod materializer;
pub mod retention;

pub use canonicalize::{canonicalize_url, clone_lock_key, CanonicalizeError};
pub use error::{MaterializeError, Result};
pub use materializer::{materialize, scan_workspace_path, Materialized};
