//! Repo config provider interface (§4.I).
//!
//! A capability interface, not a class hierarchy: implementations may be
//! static config, a persistent store, or a composition of both.

use async_trait::async_trait;

use crate::repo::RepoConfig;
use crate::Result;

#[async_trait]
pub trait RepoProvider: Send + Sync {
    /// All configured repos.
    async fn list(&self) -> Result<Vec<RepoConfig>>;

    /// A single repo by name, or `Error::NotFound`.
    async fn get(&self, name: &str) -> Result<RepoConfig>;
}
