//! Change tracker: typed mutation intents awaiting a flush.
//!
//! # Responsibility
//! - Hold at most one intent per `(entity type, key)`.
//! - Turn pending intents into `INSERT`/`UPDATE`/`DELETE` statements in the
//!   order they were first staged.
//!
//! # Invariants
//! - Re-staging overwrites the previous intent; it never stacks.
//! - Staging `Deleted` over a pending `Added` detaches the entry, since
//!   nothing was written yet.
//! - Staging `Added` over a pending `Deleted` becomes `Modified`: the row
//!   still exists, so the new values replace it in place.
//! - `flush` does not mutate tracker state; the caller applies
//!   `accept_all` only after the surrounding savepoint is released.

use crate::db::{StoreError, StoreResult};
use crate::entity::{Entity, EntityState};
use crate::query::filter::Literal;
use rusqlite::{params_from_iter, Connection, ToSql};
use std::any::{Any, TypeId};
use std::collections::HashMap;

struct TrackedEntry<T: Entity> {
    entity: T,
    state: EntityState,
    /// Staging order of the pending intent; unused while `Unchanged`.
    seq: u64,
}

struct EntitySet<T: Entity> {
    entries: HashMap<T::Key, TrackedEntry<T>>,
}

/// Type-erased view over one `EntitySet<T>`.
trait ErasedSet {
    fn pending(&self) -> Vec<(u64, &dyn PendingWrite)>;
    fn pending_count(&self) -> usize;
    fn len(&self) -> usize;
    fn accept_all(&mut self);
    fn discard_all(&mut self);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// One statement produced from a pending intent.
trait PendingWrite {
    fn apply(&self, conn: &Connection) -> StoreResult<usize>;
}

impl<T: Entity> ErasedSet for EntitySet<T> {
    fn pending(&self) -> Vec<(u64, &dyn PendingWrite)> {
        self.entries
            .values()
            .filter(|entry| entry.state.is_pending())
            .map(|entry| (entry.seq, entry as &dyn PendingWrite))
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_pending())
            .count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn accept_all(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntityState::Deleted);
        for entry in self.entries.values_mut() {
            entry.state = EntityState::Unchanged;
        }
    }

    fn discard_all(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntityState::Added);
        for entry in self.entries.values_mut() {
            entry.state = EntityState::Unchanged;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Entity> PendingWrite for TrackedEntry<T> {
    fn apply(&self, conn: &Connection) -> StoreResult<usize> {
        let columns = T::columns();
        let values = self.entity.values();
        if columns.len() != values.len() {
            return Err(StoreError::InvalidData(format!(
                "`{}` declares {} columns but produced {} values",
                T::TABLE,
                columns.len(),
                values.len()
            )));
        }
        let key = self.entity.key();
        let table = T::TABLE;

        let affected = match self.state {
            EntityState::Unchanged => return Ok(0),
            EntityState::Added => {
                let column_list = columns
                    .iter()
                    .map(|column| format!("\"{column}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                let placeholders = vec!["?"; columns.len()].join(", ");
                let sql = format!("INSERT INTO \"{table}\" ({column_list}) VALUES ({placeholders});");
                return Ok(conn.execute(&sql, params_from_iter(values.iter()))?);
            }
            EntityState::Modified => {
                let (assignments, mut binds) = non_key_assignments::<T>(columns, &values)?;
                if assignments.is_empty() {
                    return Ok(0);
                }
                binds.push(&key);
                let sql = format!(
                    "UPDATE \"{table}\" SET {} WHERE \"{}\" = ?;",
                    assignments.join(", "),
                    T::KEY
                );
                conn.execute(&sql, params_from_iter(binds))?
            }
            EntityState::Deleted => {
                let sql = format!("DELETE FROM \"{table}\" WHERE \"{}\" = ?;", T::KEY);
                conn.execute(&sql, [&key as &dyn ToSql])?
            }
        };

        if affected != 1 {
            return Err(StoreError::ConcurrencyConflict {
                table,
                expected: 1,
                affected,
            });
        }
        Ok(affected)
    }
}

fn non_key_assignments<'v, T: Entity>(
    columns: &[&str],
    values: &'v [Literal],
) -> StoreResult<(Vec<String>, Vec<&'v dyn ToSql>)> {
    if !columns.contains(&T::KEY) {
        return Err(StoreError::InvalidData(format!(
            "`{}` does not list its key column `{}`",
            T::TABLE,
            T::KEY
        )));
    }
    let mut assignments = Vec::new();
    let mut binds: Vec<&dyn ToSql> = Vec::new();
    for (column, value) in columns.iter().zip(values) {
        if *column == T::KEY {
            continue;
        }
        assignments.push(format!("\"{column}\" = ?"));
        binds.push(value);
    }
    Ok((assignments, binds))
}

/// Intent registry shared by every repository of one unit of work.
#[derive(Default)]
pub struct ChangeTracker {
    sets: HashMap<TypeId, Box<dyn ErasedSet>>,
    next_seq: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the intent for `entity`, overwriting any previous one.
    pub fn attach<T: Entity>(&mut self, entity: T, state: EntityState) {
        let seq = self.next_seq;
        let set = self.set_mut::<T>();
        let key = entity.key();

        match set.entries.get(&key).map(|entry| entry.state) {
            Some(EntityState::Added) if state == EntityState::Deleted => {
                set.entries.remove(&key);
            }
            Some(EntityState::Deleted) if state == EntityState::Added => {
                if let Some(entry) = set.entries.get_mut(&key) {
                    entry.entity = entity;
                    entry.state = EntityState::Modified;
                }
            }
            Some(previous) => {
                if let Some(entry) = set.entries.get_mut(&key) {
                    if !previous.is_pending() && state.is_pending() {
                        entry.seq = seq;
                    }
                    entry.entity = entity;
                    entry.state = state;
                }
            }
            None => {
                set.entries.insert(key, TrackedEntry { entity, state, seq });
            }
        }
        self.next_seq += 1;
    }

    /// Attaches `entity` as `Unchanged` unless its key is already tracked.
    ///
    /// Used for tracked reads: a read never clobbers a staged intent.
    pub fn attach_loaded<T: Entity>(&mut self, entity: T) {
        let set = self.set_mut::<T>();
        let key = entity.key();
        set.entries.entry(key).or_insert(TrackedEntry {
            entity,
            state: EntityState::Unchanged,
            seq: 0,
        });
    }

    pub fn state_of<T: Entity>(&self, key: &T::Key) -> Option<EntityState> {
        self.set::<T>()?.entries.get(key).map(|entry| entry.state)
    }

    /// Currently tracked snapshot for `key`.
    pub fn tracked<T: Entity>(&self, key: &T::Key) -> Option<&T> {
        self.set::<T>()?.entries.get(key).map(|entry| &entry.entity)
    }

    pub fn pending_count(&self) -> usize {
        self.sets.values().map(|set| set.pending_count()).sum()
    }

    pub fn has_changes(&self) -> bool {
        self.pending_count() > 0
    }

    /// Number of tracked entries, pending or not.
    pub fn len(&self) -> usize {
        self.sets.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes every pending intent in staging order.
    ///
    /// Returns the number of rows written. Stops at the first failure; the
    /// caller owns the savepoint that makes this all-or-nothing.
    pub fn flush(&self, conn: &Connection) -> StoreResult<usize> {
        let mut pending: Vec<(u64, &dyn PendingWrite)> =
            self.sets.values().flat_map(|set| set.pending()).collect();
        pending.sort_by_key(|(seq, _)| *seq);

        let mut written = 0;
        for (_, write) in pending {
            written += write.apply(conn)?;
        }
        Ok(written)
    }

    /// Marks a successful flush: `Deleted` entries are detached, everything
    /// else becomes `Unchanged`.
    pub fn accept_all(&mut self) {
        for set in self.sets.values_mut() {
            set.accept_all();
        }
    }

    /// Drops every pending intent: `Added` entries are detached, everything
    /// else becomes `Unchanged`.
    pub fn discard_all(&mut self) {
        for set in self.sets.values_mut() {
            set.discard_all();
        }
    }

    fn set<T: Entity>(&self) -> Option<&EntitySet<T>> {
        self.sets
            .get(&TypeId::of::<T>())
            .and_then(|set| set.as_any().downcast_ref::<EntitySet<T>>())
    }

    fn set_mut<T: Entity>(&mut self) -> &mut EntitySet<T> {
        self.sets
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Box::new(EntitySet::<T> {
                    entries: HashMap::new(),
                })
            })
            .as_any_mut()
            .downcast_mut::<EntitySet<T>>()
            .expect("entity sets are keyed by their own TypeId")
    }
}
