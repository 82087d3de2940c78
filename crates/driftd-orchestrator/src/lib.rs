//! Scan orchestrator, cron scheduler, and repo provider implementations.
//!
//! - [`orchestrator`]: the scan-start lifecycle (§4.F).
//! - [`scheduler`]: the cron-driven trigger (§4.G).
//! - [`providers`]: `RepoProvider` implementations this core ships directly.

pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod scheduler;

pub use error::{OrchestratorError, Result};
pub use orchestrator::{PassthroughSecretResolver, ScanOrchestrator, SecretResolver};
pub use providers::{CompositeRepoProvider, StaticRepoProvider};
pub use scheduler::CronScheduler;
