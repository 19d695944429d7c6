//! Change-tracking context shared by every repository of one unit of work.
//!
//! # Responsibility
//! - Own the scope connection and the change tracker.
//! - Execute composed reads and flush staged intents atomically.
//!
//! # Invariants
//! - Only the owning `UnitOfWork` holds a strong reference; repositories
//!   reach the context through `ContextHandle` (weak).
//! - `flush` runs inside a savepoint, so a failure leaves the store and the
//!   tracker exactly as they were before the call, unless SQLite itself
//!   aborted the enclosing transaction (an interrupted write does).
//! - An explicit transaction stays owned by the caller until `commit` or
//!   `rollback`, even when SQLite has already ended it.

use crate::db::StoreResult;
use crate::entity::{Entity, EntityRow, EntityState};
use crate::error::{UowError, UowResult};
use crate::query::compose::ComposedQuery;
use crate::query::descriptor::Tracking;
use crate::tracking::ChangeTracker;
use log::warn;
use rusqlite::{params_from_iter, Connection, InterruptHandle};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const SAVE_SAVEPOINT: &str = "unitwork_save";

pub struct DbContext {
    conn: Connection,
    tracker: RefCell<ChangeTracker>,
    /// Set by `begin`, cleared once the caller ends the transaction.
    explicit_transaction: Cell<bool>,
}

impl DbContext {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            tracker: RefCell::new(ChangeTracker::new()),
            explicit_transaction: Cell::new(false),
        }
    }

    /// Whether the caller holds an explicit transaction that it has not
    /// committed or rolled back yet.
    pub fn in_transaction(&self) -> bool {
        self.explicit_transaction.get()
    }

    /// Whether the caller's transaction was already rolled back by SQLite,
    /// e.g. after an interrupted write.
    pub fn transaction_aborted(&self) -> bool {
        self.explicit_transaction.get() && self.conn.is_autocommit()
    }

    /// Sets the intent for `entity`, overwriting any previous one.
    pub fn attach<T: Entity>(&self, entity: T, state: EntityState) {
        self.tracker.borrow_mut().attach(entity, state);
    }

    pub fn state_of<T: Entity>(&self, key: &T::Key) -> Option<EntityState> {
        self.tracker.borrow().state_of::<T>(key)
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.borrow().pending_count()
    }

    pub(crate) fn discard_changes(&self) {
        self.tracker.borrow_mut().discard_all();
    }

    pub(crate) fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    pub(crate) fn begin(&self) -> StoreResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.explicit_transaction.set(true);
        Ok(())
    }

    pub(crate) fn commit(&self) -> StoreResult<()> {
        let result = self.conn.execute_batch("COMMIT;");
        self.release_if_ended();
        result?;
        Ok(())
    }

    pub(crate) fn rollback(&self) -> StoreResult<()> {
        let result = self.conn.execute_batch("ROLLBACK;");
        self.release_if_ended();
        result?;
        Ok(())
    }

    /// Drops ownership of a transaction SQLite has already ended.
    pub(crate) fn forget_transaction(&self) {
        self.explicit_transaction.set(false);
    }

    // A failed COMMIT (e.g. SQLITE_BUSY) leaves the transaction open.
    fn release_if_ended(&self) {
        if self.conn.is_autocommit() {
            self.explicit_transaction.set(false);
        }
    }

    /// Writes every pending intent, all or nothing.
    ///
    /// Returns the number of rows written. On success every flushed entry
    /// becomes `Unchanged` (deleted entries are detached); on failure the
    /// savepoint is rolled back and all intents stay staged.
    pub(crate) fn flush(&self) -> StoreResult<usize> {
        if !self.tracker.borrow().has_changes() {
            return Ok(0);
        }

        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVE_SAVEPOINT};"))?;
        let flushed = self.tracker.borrow().flush(&self.conn);
        let written = match flushed {
            Ok(written) => written,
            Err(err) => {
                self.abandon_savepoint();
                return Err(err);
            }
        };

        if let Err(err) = self
            .conn
            .execute_batch(&format!("RELEASE {SAVE_SAVEPOINT};"))
        {
            self.abandon_savepoint();
            return Err(err.into());
        }

        self.tracker.borrow_mut().accept_all();
        Ok(written)
    }

    fn abandon_savepoint(&self) {
        let sql = format!("ROLLBACK TO {SAVE_SAVEPOINT}; RELEASE {SAVE_SAVEPOINT};");
        if let Err(err) = self.conn.execute_batch(&sql) {
            // SQLite may already have rolled back the enclosing transaction,
            // taking the savepoint with it.
            warn!(
                "event=uow_save module=context status=error error_code=savepoint_rollback_failed error={}",
                err
            );
        }
    }

    /// Runs a composed row query and applies its tracking mode.
    pub(crate) fn fetch<T: Entity>(&self, composed: &ComposedQuery) -> StoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(&composed.sql)?;
        let mut rows = stmt.query(params_from_iter(composed.binds.iter()))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(T::from_row(&EntityRow::new(row, &composed.relations))?);
        }

        if composed.tracking == Tracking::Tracked && !entities.is_empty() {
            let mut tracker = self.tracker.borrow_mut();
            for entity in &entities {
                tracker.attach_loaded(entity.clone());
            }
        }
        Ok(entities)
    }

    /// Runs a composed `EXISTS`/`COUNT` query.
    pub(crate) fn fetch_scalar(&self, composed: &ComposedQuery) -> StoreResult<i64> {
        let value = self.conn.query_row(
            &composed.sql,
            params_from_iter(composed.binds.iter()),
            |row| row.get(0),
        )?;
        Ok(value)
    }
}

/// Weak reference to a unit of work's context.
///
/// Handed to repositories (including registered overrides). Every access
/// fails with `InvalidOperation` once the unit of work is disposed.
#[derive(Clone)]
pub struct ContextHandle {
    inner: Weak<DbContext>,
}

impl ContextHandle {
    pub(crate) fn new(context: &Rc<DbContext>) -> Self {
        Self {
            inner: Rc::downgrade(context),
        }
    }

    /// Runs `f` against the live context.
    ///
    /// # Errors
    /// - `UowError::InvalidOperation` when the unit of work is gone.
    pub fn with<R>(&self, operation: &str, f: impl FnOnce(&DbContext) -> R) -> UowResult<R> {
        let context = self
            .inner
            .upgrade()
            .ok_or_else(|| UowError::disposed(operation))?;
        Ok(f(&context))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
