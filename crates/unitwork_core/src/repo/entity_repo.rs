//! Default repository bound to a unit of work's context.

use super::query::Query;
use super::Repository;
use crate::context::ContextHandle;
use crate::db::{StoreError, StoreResult};
use crate::entity::{Entity, EntityState};
use crate::error::{UowError, UowResult};
use crate::query::compose::{compose, Projection};
use crate::query::descriptor::QueryDescriptor;
use crate::query::filter::Filter;
use log::{debug, warn};
use std::marker::PhantomData;
use std::time::Instant;

/// Repository for any `T: Entity`, built without per-type configuration.
pub struct EntityRepository<T: Entity> {
    context: ContextHandle,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityRepository<T> {
    pub fn new(context: ContextHandle) -> Self {
        Self {
            context,
            _entity: PhantomData,
        }
    }

    fn stage(&self, entity: &T, state: EntityState, operation: &'static str) -> UowResult<()> {
        self.context.with(operation, |context| {
            context.attach(entity.clone(), state);
        })?;
        debug!(
            "event=repo_stage module=repo status=ok entity={} operation={} state={} key={:?}",
            T::TABLE,
            operation,
            state.as_str(),
            entity.key()
        );
        Ok(())
    }
}

impl<T: Entity> Repository<T> for EntityRepository<T> {
    fn stage_create(&self, entity: &T) -> UowResult<()> {
        self.stage(entity, EntityState::Added, "stage_create")
    }

    fn stage_update(&self, entity: &T) -> UowResult<()> {
        self.stage(entity, EntityState::Modified, "stage_update")
    }

    fn stage_delete(&self, entity: &T) -> UowResult<()> {
        self.stage(entity, EntityState::Deleted, "stage_delete")
    }

    fn get_entity(&self, descriptor: &QueryDescriptor) -> UowResult<Option<T>> {
        let rows = fetch_rows::<T>(&self.context, descriptor, Projection::First, "get_entity")?;
        Ok(rows.into_iter().next())
    }

    fn get_all(&self, descriptor: &QueryDescriptor) -> UowResult<Vec<T>> {
        fetch_rows::<T>(&self.context, descriptor, Projection::Rows, "get_all")
    }

    fn get_query(&self, descriptor: &QueryDescriptor) -> UowResult<Query<T>> {
        if !self.context.is_alive() {
            return Err(UowError::disposed("get_query"));
        }
        let base = descriptor.clone().without_paging();
        compose::<T>(&base, Projection::Rows)
            .map_err(|source| UowError::repository(T::TABLE, "get_query", source))?;
        Ok(Query::new(self.context.clone(), base))
    }

    fn exists(&self, predicate: Option<&Filter>) -> UowResult<bool> {
        let Some(predicate) = predicate else {
            self.context.with("exists", |_| ())?;
            return Ok(false);
        };
        let descriptor = QueryDescriptor::filtered(predicate.clone());
        fetch_exists::<T>(&self.context, &descriptor, "exists")
    }

    fn count(&self, predicate: Option<&Filter>) -> UowResult<u64> {
        let descriptor = QueryDescriptor {
            predicate: predicate.cloned(),
            ..QueryDescriptor::default()
        };
        fetch_count::<T>(&self.context, &descriptor, "count")
    }
}

/// Composes and runs a row query for `T`.
pub(crate) fn fetch_rows<T: Entity>(
    context: &ContextHandle,
    descriptor: &QueryDescriptor,
    projection: Projection,
    operation: &'static str,
) -> UowResult<Vec<T>> {
    let started_at = Instant::now();
    let result = context.with(operation, |context| -> StoreResult<Vec<T>> {
        let composed = compose::<T>(descriptor, projection)?;
        context.fetch::<T>(&composed)
    })?;

    match result {
        Ok(rows) => {
            debug!(
                "event=repo_query module=repo status=ok entity={} operation={} rows={} tracked={} duration_ms={}",
                T::TABLE,
                operation,
                rows.len(),
                descriptor.is_tracked(),
                started_at.elapsed().as_millis()
            );
            Ok(rows)
        }
        Err(source) => Err(query_failed::<T>(operation, source, started_at)),
    }
}

/// Composes and runs an `EXISTS` query for `T`.
pub(crate) fn fetch_exists<T: Entity>(
    context: &ContextHandle,
    descriptor: &QueryDescriptor,
    operation: &'static str,
) -> UowResult<bool> {
    fetch_scalar::<T>(context, descriptor, Projection::Exists, operation).map(|value| value != 0)
}

/// Composes and runs a `COUNT` query for `T`.
pub(crate) fn fetch_count<T: Entity>(
    context: &ContextHandle,
    descriptor: &QueryDescriptor,
    operation: &'static str,
) -> UowResult<u64> {
    fetch_scalar::<T>(context, descriptor, Projection::Count, operation)
        .map(|value| u64::try_from(value).unwrap_or(0))
}

fn fetch_scalar<T: Entity>(
    context: &ContextHandle,
    descriptor: &QueryDescriptor,
    projection: Projection,
    operation: &'static str,
) -> UowResult<i64> {
    let started_at = Instant::now();
    let result = context.with(operation, |context| -> StoreResult<i64> {
        let composed = compose::<T>(descriptor, projection)?;
        context.fetch_scalar(&composed)
    })?;

    match result {
        Ok(value) => {
            debug!(
                "event=repo_query module=repo status=ok entity={} operation={} value={} duration_ms={}",
                T::TABLE,
                operation,
                value,
                started_at.elapsed().as_millis()
            );
            Ok(value)
        }
        Err(source) => Err(query_failed::<T>(operation, source, started_at)),
    }
}

fn query_failed<T: Entity>(
    operation: &'static str,
    source: StoreError,
    started_at: Instant,
) -> UowError {
    warn!(
        "event=repo_query module=repo status=error entity={} operation={} duration_ms={} error={}",
        T::TABLE,
        operation,
        started_at.elapsed().as_millis(),
        source
    );
    UowError::repository(T::TABLE, operation, source)
}
