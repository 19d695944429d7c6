//! Query descriptors: the composed shape of every repository read.
//!
//! # Invariants
//! - Composition order is fixed: includes, predicate, ordering, skip, take,
//!   tracking. Builder call order never changes it.
//! - `take == 0` means unbounded.
//! - Tracking only decides whether results are attached to the change
//!   tracker; it never changes which rows are selected.

use super::filter::Filter;
use serde::{Deserialize, Serialize};

/// Eager-load directive naming a relation declared by the queried entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Include(pub String);

impl From<&str> for Include {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Include {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Whether returned entities are attached to the change tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tracking {
    #[default]
    Tracked,
    Untracked,
}

/// Immutable description of one read.
///
/// Build it fluently or with a struct literal:
///
/// ```
/// use unitwork_core::{Filter, QueryDescriptor};
///
/// let page = QueryDescriptor::new()
///     .include("customer")
///     .filter(Filter::eq("status", "open"))
///     .skip(20)
///     .take(10)
///     .untracked();
/// assert_eq!(page.take, 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDescriptor {
    pub includes: Vec<Include>,
    pub predicate: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub skip: u64,
    pub take: u64,
    pub tracking: Tracking,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor with only a predicate set.
    pub fn filtered(predicate: Filter) -> Self {
        Self::new().filter(predicate)
    }

    pub fn include(mut self, relation: impl Into<Include>) -> Self {
        self.includes.push(relation.into());
        self
    }

    /// Adds a predicate, AND-ing it with any predicate already present.
    pub fn filter(mut self, predicate: Filter) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = take;
        self
    }

    pub fn tracking(mut self, tracking: Tracking) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn untracked(self) -> Self {
        self.tracking(Tracking::Untracked)
    }

    /// Same descriptor with pagination cleared.
    pub fn without_paging(mut self) -> Self {
        self.skip = 0;
        self.take = 0;
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking == Tracking::Tracked
    }
}
