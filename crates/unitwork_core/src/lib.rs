//! Typed repositories and a unit of work over a transactional SQLite store.
//!
//! A [`UnitOfWork`] owns one scope connection and a change tracker. It hands
//! out one [`Repository`] per entity type; repositories stage mutations and
//! compose reads from a [`QueryDescriptor`]. Nothing is written until
//! [`UnitOfWork::save`].

pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod query;
pub mod repo;
pub mod tracking;
pub mod uow;

pub use context::{ContextHandle, DbContext};
pub use db::{open_connection, StoreConfig, StoreError, StoreResult};
pub use entity::{Entity, EntityRow, EntityState, Relation};
pub use error::{UowError, UowResult};
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LogConfig};
pub use query::descriptor::{Include, OrderBy, QueryDescriptor, SortDirection, Tracking};
pub use query::filter::{CompareOp, Filter, Literal};
pub use repo::entity_repo::EntityRepository;
pub use repo::query::Query;
pub use repo::Repository;
pub use tracking::ChangeTracker;
pub use uow::{RepositoryRegistry, UnitOfWork, UnitOfWorkFactory};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
