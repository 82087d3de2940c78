//! Glob matcher (§4.A): evaluates `**`-capable path patterns against
//! slash-normalized relative paths.

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Patterns pruned from every walk unless overridden by the caller.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git/**",
    ".terraform/**",
    ".terragrunt-cache/**",
    "**/.terraform/**",
    "**/.terragrunt-cache/**",
    "**/vendor/**",
    "**/node_modules/**",
];

/// Compiled set of ignore patterns. A pattern that fails to compile is
/// dropped rather than treated as fatal — discovery must never error out
/// because of a malformed user-supplied ignore pattern.
pub struct IgnoreMatcher {
    set: GlobSet,
}

impl IgnoreMatcher {
    /// Build a matcher from the default ignores plus any user-supplied patterns.
    pub fn new(user_patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORES.iter().copied().chain(user_patterns.iter().map(String::as_str)) {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::debug!(pattern, error = %e, "ignoring invalid glob pattern");
                }
            }
        }
        let set = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());
        Self { set }
    }

    /// Whether `path` (slash-normalized, relative) matches any ignore pattern.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ignores_match_nested_terraform_cache() {
        let m = IgnoreMatcher::new(&[]);
        assert!(m.is_ignored(".terraform/x.tf"));
        assert!(m.is_ignored("app/.terraform/x.tf"));
        assert!(m.is_ignored("deep/nested/.terragrunt-cache/y.hcl"));
        assert!(m.is_ignored("vendor/lib/mod.tf"));
        assert!(!m.is_ignored("app/main.tf"));
    }

    #[test]
    fn user_patterns_are_merged() {
        let m = IgnoreMatcher::new(&["envs/staging/**".to_string()]);
        assert!(m.is_ignored("envs/staging/app/main.tf"));
        assert!(!m.is_ignored("envs/prod/app/main.tf"));
    }

    #[test]
    fn invalid_pattern_does_not_panic_or_match_everything() {
        let m = IgnoreMatcher::new(&["[".to_string()]);
        assert!(!m.is_ignored("app/main.tf"));
    }
}
