//! valwatch-storage — storage backends for valwatch.
//!
//! Backends:
//! - [`MemoryStore`] — in-memory (dev/testing, no persistence), re-exported from core
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use valwatch_core::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
