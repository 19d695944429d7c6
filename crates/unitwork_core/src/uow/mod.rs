//! Unit of work: one transactional scope and its repository registry.
//!
//! # Responsibility
//! - Own the scope's `DbContext` (connection + change tracker).
//! - Cache exactly one repository per entity type for the scope lifetime.
//! - Coordinate save, transactions and disposal for all repositories.
//!
//! # Invariants
//! - `repository::<T>()` returns the same `Rc` on every call.
//! - A registered override wins over the default `EntityRepository<T>`.
//! - Disposal rolls back an open transaction and invalidates every
//!   repository handed out.
//!
//! # Concurrency
//! A unit of work is a single-caller scope. It is `!Send` and `!Sync`; all
//! operations on it and its repositories must be sequenced by the caller.
//! Only the interrupt handle may cross threads.

mod registry;

pub use registry::{RepositoryRegistry, UnitOfWorkFactory};

use crate::context::{ContextHandle, DbContext};
use crate::db::StoreResult;
use crate::entity::{Entity, EntityState};
use crate::error::{UowError, UowResult};
use crate::repo::entity_repo::EntityRepository;
use crate::repo::Repository;
use log::{debug, error, info, warn};
use rusqlite::{Connection, InterruptHandle};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

pub struct UnitOfWork {
    context: Rc<DbContext>,
    repositories: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

impl UnitOfWork {
    /// Wraps an already configured connection, with no overrides.
    pub fn new(conn: Connection) -> Self {
        Self::with_registry(conn, &RepositoryRegistry::default())
    }

    /// Wraps `conn` and instantiates every override in `registry`.
    pub fn with_registry(conn: Connection, registry: &RepositoryRegistry) -> Self {
        let context = Rc::new(DbContext::new(conn));
        let slots = registry.build_slots(&ContextHandle::new(&context));
        debug!(
            "event=uow_create module=uow status=ok overrides={}",
            slots.len()
        );
        Self {
            context,
            repositories: RefCell::new(slots),
        }
    }

    /// Repository for entity `T`, created on first access and cached.
    ///
    /// # Errors
    /// - `UowError::InvalidOperation` if the slot for `T` holds a handle for
    ///   another type, which registrations keyed by `TypeId` rule out.
    pub fn repository<T: Entity>(&self) -> UowResult<Rc<dyn Repository<T>>> {
        let type_id = TypeId::of::<T>();
        if let Some(slot) = self.repositories.borrow().get(&type_id) {
            return slot
                .downcast_ref::<Rc<dyn Repository<T>>>()
                .cloned()
                .ok_or_else(|| {
                    UowError::InvalidOperation(format!(
                        "repository slot for `{}` holds a handle of another type",
                        T::TABLE
                    ))
                });
        }

        let repository: Rc<dyn Repository<T>> =
            Rc::new(EntityRepository::<T>::new(self.context_handle()));
        self.repositories
            .borrow_mut()
            .insert(type_id, Box::new(Rc::clone(&repository)));
        debug!(
            "event=uow_registry module=uow status=ok action=default entity={}",
            T::TABLE
        );
        Ok(repository)
    }

    /// Weak handle to this scope's context, for custom repositories.
    pub fn context_handle(&self) -> ContextHandle {
        ContextHandle::new(&self.context)
    }

    pub fn in_transaction(&self) -> bool {
        self.context.in_transaction()
    }

    /// Opens an explicit transaction that scopes every later save until
    /// commit or rollback.
    pub fn begin_transaction(&self) -> UowResult<()> {
        if self.in_transaction() {
            return Err(UowError::transaction(
                "begin",
                "a transaction is already open",
            ));
        }
        self.transaction_step("begin", DbContext::begin)
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    /// - `UowError::Transaction` when no transaction is open, when SQLite
    ///   already rolled it back (the scope then has no open transaction), or
    ///   when `COMMIT` fails.
    pub fn commit_transaction(&self) -> UowResult<()> {
        if !self.in_transaction() {
            return Err(UowError::transaction("commit", "no transaction is open"));
        }
        if self.context.transaction_aborted() {
            self.context.forget_transaction();
            error!(
                "event=uow_transaction module=uow status=error action=commit error_code=transaction_aborted"
            );
            return Err(UowError::transaction(
                "commit",
                "the store already rolled back this transaction",
            ));
        }
        self.transaction_step("commit", DbContext::commit)
    }

    /// Rolls back the open transaction.
    ///
    /// Entities saved inside the transaction stay `Unchanged` in the
    /// tracker; call `discard_changes` or start a new scope to resync.
    ///
    /// Succeeds when SQLite already rolled the transaction back (after an
    /// interrupted write); the scope is then ready for a new transaction.
    pub fn rollback_transaction(&self) -> UowResult<()> {
        if !self.in_transaction() {
            return Err(UowError::transaction("rollback", "no transaction is open"));
        }
        if self.context.transaction_aborted() {
            self.context.forget_transaction();
            warn!(
                "event=uow_transaction module=uow status=ok action=rollback note=already_rolled_back_by_store"
            );
            return Ok(());
        }
        self.transaction_step("rollback", DbContext::rollback)
    }

    /// Flushes every staged intent across all repositories, atomically.
    ///
    /// Returns the number of rows written; `0` when nothing was staged.
    ///
    /// # Errors
    /// - `UowError::Transaction` when any statement fails. Nothing from this
    ///   call is applied and every intent remains staged.
    pub fn save(&self) -> UowResult<usize> {
        let started_at = Instant::now();
        let pending = self.context.pending_count();
        match self.context.flush() {
            Ok(rows) => {
                info!(
                    "event=uow_save module=uow status=ok pending={} rows={} in_transaction={} duration_ms={}",
                    pending,
                    rows,
                    self.in_transaction(),
                    started_at.elapsed().as_millis()
                );
                Ok(rows)
            }
            Err(err) => {
                error!(
                    "event=uow_save module=uow status=error pending={} duration_ms={} error_code=save_failed error={}",
                    pending,
                    started_at.elapsed().as_millis(),
                    err
                );
                let message = if self.context.transaction_aborted() {
                    "the store aborted the enclosing transaction; earlier saves in it were rolled back"
                } else {
                    "no staged change was applied"
                };
                Err(UowError::Transaction {
                    operation: "save",
                    message: message.to_string(),
                    source: Some(err),
                })
            }
        }
    }

    pub fn has_changes(&self) -> bool {
        self.pending_changes() > 0
    }

    /// Number of staged intents awaiting `save`.
    pub fn pending_changes(&self) -> usize {
        self.context.pending_count()
    }

    /// Drops every staged intent without touching the store.
    pub fn discard_changes(&self) {
        self.context.discard_changes();
    }

    /// Tracker state of `entity`, or `None` when it is not tracked.
    pub fn entity_state<T: Entity>(&self, entity: &T) -> Option<EntityState> {
        self.context.state_of::<T>(&entity.key())
    }

    /// Cancellation signal for this scope's store round-trips.
    ///
    /// `interrupt()` may be called from any thread; the running statement
    /// fails with an interrupted error. Transactions are never rolled back
    /// on the caller's behalf: after an interrupt inside a transaction, call
    /// `rollback_transaction`.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.context.interrupt_handle()
    }

    /// Ends the scope. Equivalent to dropping the unit of work.
    pub fn dispose(self) {
        drop(self);
    }

    fn transaction_step(
        &self,
        operation: &'static str,
        step: fn(&DbContext) -> StoreResult<()>,
    ) -> UowResult<()> {
        let started_at = Instant::now();
        match step(&self.context) {
            Ok(()) => {
                info!(
                    "event=uow_transaction module=uow status=ok action={} duration_ms={}",
                    operation,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=uow_transaction module=uow status=error action={} duration_ms={} error_code=transaction_failed error={}",
                    operation,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(UowError::transaction_failed(operation, err))
            }
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.context.transaction_aborted() {
            self.context.forget_transaction();
        } else if self.context.in_transaction() {
            warn!("event=uow_dispose module=uow status=ok action=implicit_rollback");
            if let Err(err) = self.context.rollback() {
                error!(
                    "event=uow_dispose module=uow status=error error_code=rollback_failed error={}",
                    err
                );
            }
        }
        self.repositories.get_mut().clear();
        debug!("event=uow_dispose module=uow status=ok");
    }
}
