//! Entity mapping contract consumed by repositories and the change tracker.
//!
//! # Responsibility
//! - Describe how one application record type maps to one table.
//! - Declare to-one relations that include directives may join.
//!
//! # Invariants
//! - `columns()` and `values()` have the same length and order.
//! - `columns()` contains `KEY`.
//! - Keys are assigned by the caller before staging; the tracker identifies
//!   entries by `(entity type, key)`.

use crate::query::filter::Literal;
use rusqlite::types::FromSql;
use rusqlite::{Row, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Pending mutation attached to a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Matches the store as of the last read or save.
    Unchanged,
    /// Inserted on the next save.
    Added,
    /// Updated on the next save.
    Modified,
    /// Deleted on the next save.
    Deleted,
}

impl EntityState {
    /// Whether a save has work to do for this entry.
    pub fn is_pending(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

/// To-one relation an include directive can join.
///
/// Joined columns are readable through [`EntityRow::related`] and usable in
/// predicates as `name.column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    /// Directive name and SQL alias of the joined table.
    pub name: &'static str,
    pub table: &'static str,
    /// Column on the owning entity's table.
    pub local_column: &'static str,
    /// Column on `table`, expected to be unique.
    pub foreign_column: &'static str,
    /// Columns loaded from `table` when the relation is included.
    pub columns: &'static [&'static str],
}

/// Row view handed to [`Entity::from_row`].
pub struct EntityRow<'a, 'stmt> {
    row: &'a Row<'stmt>,
    loaded: &'a [&'static Relation],
}

impl<'a, 'stmt> EntityRow<'a, 'stmt> {
    pub(crate) fn new(row: &'a Row<'stmt>, loaded: &'a [&'static Relation]) -> Self {
        Self { row, loaded }
    }

    /// Reads a column of the entity's own table.
    pub fn get<V: FromSql>(&self, column: &str) -> rusqlite::Result<V> {
        self.row.get(column)
    }

    /// Whether `relation` was included by the query that produced this row.
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.loaded.iter().any(|loaded| loaded.name == relation)
    }

    /// Reads a column of an included relation.
    ///
    /// Returns `None` when the relation was not included or the join found
    /// no matching row.
    pub fn related<V: FromSql>(&self, relation: &str, column: &str) -> rusqlite::Result<Option<V>> {
        if !self.is_loaded(relation) {
            return Ok(None);
        }
        self.row.get::<_, Option<V>>(relation_alias(relation, column).as_str())
    }
}

/// Application record persisted through a [`Repository`](crate::Repository).
pub trait Entity: Clone + 'static {
    const TABLE: &'static str;
    const KEY: &'static str;

    type Key: Clone + Eq + Hash + Debug + ToSql + 'static;

    /// Persisted columns, `KEY` included, in `values()` order.
    fn columns() -> &'static [&'static str];

    fn key(&self) -> Self::Key;

    /// Column values in `columns()` order.
    fn values(&self) -> Vec<Literal>;

    fn from_row(row: &EntityRow<'_, '_>) -> rusqlite::Result<Self>;

    fn relations() -> &'static [Relation] {
        &[]
    }

    fn relation(name: &str) -> Option<&'static Relation> {
        Self::relations()
            .iter()
            .find(|relation| relation.name == name)
    }

    /// Value of one persisted column, for in-memory predicate evaluation.
    fn field(&self, column: &str) -> Option<Literal> {
        let index = Self::columns().iter().position(|name| *name == column)?;
        self.values().into_iter().nth(index)
    }
}

/// Result-column alias for a joined relation column.
pub(crate) fn relation_alias(relation: &str, column: &str) -> String {
    format!("{relation}.{column}")
}
