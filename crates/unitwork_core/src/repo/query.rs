//! Deferred query handle returned by `Repository::get_query`.
//!
//! Nothing touches the store until a terminal method (`to_vec`, `first`,
//! `count`, `any`) runs. Terminal methods compose through the same pipeline
//! as every other repository read.

use super::entity_repo::{fetch_count, fetch_exists, fetch_rows};
use crate::context::ContextHandle;
use crate::entity::Entity;
use crate::error::UowResult;
use crate::query::compose::Projection;
use crate::query::descriptor::{Include, QueryDescriptor, SortDirection, Tracking};
use crate::query::filter::Filter;
use std::marker::PhantomData;

#[derive(Clone)]
pub struct Query<T: Entity> {
    context: ContextHandle,
    descriptor: QueryDescriptor,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(context: ContextHandle, descriptor: QueryDescriptor) -> Self {
        Self {
            context,
            descriptor,
            _entity: PhantomData,
        }
    }

    /// Descriptor this handle will execute.
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn include(mut self, relation: impl Into<Include>) -> Self {
        self.descriptor = self.descriptor.include(relation);
        self
    }

    /// Narrows the query; AND-ed with the existing predicate.
    pub fn filter(mut self, predicate: Filter) -> Self {
        self.descriptor = self.descriptor.filter(predicate);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.descriptor = self.descriptor.order_by(column, direction);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.descriptor.skip = skip;
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.descriptor.take = take;
        self
    }

    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.descriptor.tracking = tracking;
        self
    }

    pub fn to_vec(&self) -> UowResult<Vec<T>> {
        fetch_rows::<T>(&self.context, &self.descriptor, Projection::Rows, "query.to_vec")
    }

    pub fn first(&self) -> UowResult<Option<T>> {
        let rows = fetch_rows::<T>(&self.context, &self.descriptor, Projection::First, "query.first")?;
        Ok(rows.into_iter().next())
    }

    /// Rows the query would return, honoring skip and take.
    pub fn count(&self) -> UowResult<u64> {
        fetch_count::<T>(&self.context, &self.descriptor, "query.count")
    }

    pub fn any(&self) -> UowResult<bool> {
        fetch_exists::<T>(&self.context, &self.descriptor, "query.any")
    }
}
