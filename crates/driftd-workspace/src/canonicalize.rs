//! URL canonicalizer (§4.H): normalizes a git URL to a comparison key used
//! to derive the clone-lock hash.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalizeError(pub String);

impl std::fmt::Display for CanonicalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot canonicalize url: {}", self.0)
    }
}

impl std::error::Error for CanonicalizeError {}

fn normalize_path(path: &str) -> Result<String, CanonicalizeError> {
    let trimmed = path.trim_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || trimmed.starts_with("../") {
        return Err(CanonicalizeError(path.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Whether `s` looks like SCP-style syntax: no `://` and contains a `:`.
fn looks_like_scp(s: &str) -> bool {
    !s.contains("://") && s.contains(':')
}

/// Normalize a git URL to a canonical comparison key (§4.H).
pub fn canonicalize_url(raw: &str) -> Result<String, CanonicalizeError> {
    if raw.is_empty() || raw == "." || raw == ".." {
        return Err(CanonicalizeError(raw.to_string()));
    }

    if looks_like_scp(raw) {
        let without_user = raw.rsplit_once('@').map(|(_, rest)| rest).unwrap_or(raw);
        let (host, path) = without_user
            .split_once(':')
            .ok_or_else(|| CanonicalizeError(raw.to_string()))?;
        if host.is_empty() {
            return Err(CanonicalizeError(raw.to_string()));
        }
        let path = normalize_path(path)?;
        return Ok(format!("{}/{}", host.to_lowercase(), path));
    }

    if let Ok(parsed) = url::Url::parse(raw) {
        if let Some(host) = parsed.host_str() {
            if !host.is_empty() {
                let path = normalize_path(parsed.path())?;
                return Ok(format!("{}/{}", host.to_lowercase(), path));
            }
        }
    }

    let cleaned = normalize_path(raw)?;
    Ok(format!("local:{cleaned}"))
}

/// Hex-encoded SHA-256 of the canonical key, used as the clone-lock key.
pub fn clone_lock_key(raw: &str) -> Result<String, CanonicalizeError> {
    let canonical = canonicalize_url(raw)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
