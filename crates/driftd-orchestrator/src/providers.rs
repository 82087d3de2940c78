//! Repo provider implementations (§4.I). The repository-config source of
//! truth is an external collaborator; these are the shapes this core
//! ships so callers aren't forced to hand-roll the trivial ones.

use async_trait::async_trait;
use driftd_core::{Error, RepoConfig, RepoProvider, Result};

/// A fixed, in-memory repo list — the common case for a single static
/// config file (driftd-config's KDL repo list lands here).
pub struct StaticRepoProvider {
    repos: Vec<RepoConfig>,
}

impl StaticRepoProvider {
    pub fn new(repos: Vec<RepoConfig>) -> Self {
        Self { repos }
    }
}

#[async_trait]
impl RepoProvider for StaticRepoProvider {
    async fn list(&self) -> Result<Vec<RepoConfig>> {
        Ok(self.repos.clone())
    }

    async fn get(&self, name: &str) -> Result<RepoConfig> {
        self.repos
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("repo '{name}'")))
    }
}

/// Composes several providers: `list` concatenates (later providers'
/// entries win on name collision), `get` tries each in order.
pub struct CompositeRepoProvider {
    providers: Vec<Box<dyn RepoProvider>>,
}

impl CompositeRepoProvider {
    pub fn new(providers: Vec<Box<dyn RepoProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl RepoProvider for CompositeRepoProvider {
    async fn list(&self) -> Result<Vec<RepoConfig>> {
        let mut by_name = std::collections::BTreeMap::new();
        for provider in &self.providers {
            for repo in provider.list().await? {
                by_name.insert(repo.name.clone(), repo);
            }
        }
        Ok(by_name.into_values().collect())
    }

    async fn get(&self, name: &str) -> Result<RepoConfig> {
        for provider in self.providers.iter().rev() {
            if let Ok(repo) = provider.get(name).await {
                return Ok(repo);
            }
        }
        Err(Error::NotFound(format!("repo '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str) -> RepoConfig {
        RepoConfig {
            name: name.to_string(),
            url: format!("https://github.com/acme/{name}.git"),
            branch: String::new(),
            ignore_paths: vec![],
            schedule: String::new(),
            cancel_inflight_enabled: false,
            auth: Default::default(),
        }
    }

    #[tokio::test]
    async fn static_provider_list_and_get() {
        let provider = StaticRepoProvider::new(vec![repo("infra")]);
        assert_eq!(provider.list().await.unwrap().len(), 1);
        assert!(provider.get("infra").await.is_ok());
        assert!(provider.get("missing").await.is_err());
    }

    #[tokio::test]
    async fn composite_provider_lets_later_providers_win() {
        let base = StaticRepoProvider::new(vec![repo("infra")]);
        let mut overridden = repo("infra");
        overridden.branch = "release".to_string();
        let overlay = StaticRepoProvider::new(vec![overridden]);

        let composite = CompositeRepoProvider::new(vec![Box::new(base), Box::new(overlay)]);
        let resolved = composite.get("infra").await.unwrap();
        assert_eq!(resolved.branch, "release");
    }
}
