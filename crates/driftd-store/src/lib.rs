//! Coordination store implementations: Postgres-backed for production, an
//! in-memory double for tests and local development.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{to_core_error, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PgCoordinationStore;
