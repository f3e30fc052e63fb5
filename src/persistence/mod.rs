//! Governed persistence: allow-list policy, adapter trait, and facades.

pub mod adapter;
pub mod error;
pub mod memory;
pub mod policy;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod service;

pub use adapter::{PersistenceAdapter, Query, Record};
pub use error::{Access, PersistenceError};
pub use memory::InMemoryAdapter;
pub use policy::{AllowlistPolicy, ALL_TABLES, DEFAULT_WRITE_DENY};
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
pub use service::{PersistenceService, ReadOnlyPersistence};
