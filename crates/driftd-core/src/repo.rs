//! Repository configuration: the read-only input describing a scannable repo.

use serde::{Deserialize, Serialize};

/// Auth material descriptor. The orchestrator resolves this into actual
/// credentials via an injected secret store; this core only carries the
/// pointer to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthDescriptor {
    /// Name of the secret to resolve (e.g. an access token secret).
    pub secret_name: Option<String>,
}

/// Read-only repo configuration consumed by the orchestrator (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub ignore_paths: Vec<String>,
    /// Cron expression; empty means no scheduled trigger.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub cancel_inflight_enabled: bool,
    #[serde(default)]
    pub auth: AuthDescriptor,
}
