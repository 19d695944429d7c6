//! Repository contract and its default implementation.
//!
//! # Responsibility
//! - Define the per-entity-type façade used by application code.
//! - Route every read through the shared composition pipeline.
//!
//! # Invariants
//! - Staging never writes; only `UnitOfWork::save` does.
//! - Reads never error on "no match": `get_entity` returns `None`,
//!   `get_all` returns an empty vector.
//! - Every store failure is wrapped as `UowError::Repository` with the
//!   entity table and operation name.

pub mod entity_repo;
pub mod query;

use crate::entity::Entity;
use crate::error::UowResult;
use crate::query::descriptor::QueryDescriptor;
use crate::query::filter::Filter;
use query::Query;

/// Uniform CRUD staging and query composition for entity `T`.
///
/// This is the handle stored in a unit of work's registry. Implement it to
/// register specialized behaviour for one entity type; most overrides wrap
/// [`EntityRepository`](entity_repo::EntityRepository) and delegate.
pub trait Repository<T: Entity> {
    /// Stages `entity` for insertion on the next save.
    fn stage_create(&self, entity: &T) -> UowResult<()>;

    /// Stages `entity` for update on the next save.
    fn stage_update(&self, entity: &T) -> UowResult<()>;

    /// Stages `entity` for deletion on the next save.
    fn stage_delete(&self, entity: &T) -> UowResult<()>;

    /// First entity matching `descriptor`, or `None`.
    fn get_entity(&self, descriptor: &QueryDescriptor) -> UowResult<Option<T>>;

    /// Every entity matching `descriptor`, in query order.
    fn get_all(&self, descriptor: &QueryDescriptor) -> UowResult<Vec<T>>;

    /// Unexecuted query with includes, predicate, ordering and tracking
    /// applied. Skip and take are dropped so the caller can page.
    fn get_query(&self, descriptor: &QueryDescriptor) -> UowResult<Query<T>>;

    /// Whether any row matches `predicate`.
    ///
    /// An absent predicate returns `false` without touching the store: "no
    /// predicate" means "nothing to check", not "check anything".
    fn exists(&self, predicate: Option<&Filter>) -> UowResult<bool>;

    /// Number of rows matching `predicate` (all rows when absent).
    fn count(&self, predicate: Option<&Filter>) -> UowResult<u64>;
}
