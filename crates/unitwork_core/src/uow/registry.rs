//! Explicit repository registrations and the per-scope factory.
//!
//! # Responsibility
//! - Hold typed override factories keyed by entity type.
//! - Open one connection per scope and hand it to a new `UnitOfWork`.
//!
//! # Invariants
//! - At most one registration per entity type; registering again replaces
//!   the previous factory.

use super::UnitOfWork;
use crate::context::ContextHandle;
use crate::db::{open_connection, StoreConfig};
use crate::entity::Entity;
use crate::error::{UowError, UowResult};
use crate::repo::Repository;
use log::{debug, error};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

type SlotFactory = Box<dyn Fn(ContextHandle) -> Box<dyn Any>>;

struct Registration {
    type_id: TypeId,
    entity: &'static str,
    build: SlotFactory,
}

/// Typed map of repository overrides, keyed by entity type.
#[derive(Default)]
pub struct RepositoryRegistry {
    registrations: Vec<Registration>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as the repository for entity `T`.
    ///
    /// Every unit of work built with this registry calls `factory` once,
    /// at construction, with a handle to its own context.
    pub fn register<T, R, F>(&mut self, factory: F) -> &mut Self
    where
        T: Entity,
        R: Repository<T> + 'static,
        F: Fn(ContextHandle) -> R + 'static,
    {
        let type_id = TypeId::of::<T>();
        let build: SlotFactory = Box::new(move |context: ContextHandle| {
            let repository: Rc<dyn Repository<T>> = Rc::new(factory(context));
            Box::new(repository) as Box<dyn Any>
        });
        self.registrations
            .retain(|registration| registration.type_id != type_id);
        self.registrations.push(Registration {
            type_id,
            entity: T::TABLE,
            build,
        });
        self
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        let type_id = TypeId::of::<T>();
        self.registrations
            .iter()
            .any(|registration| registration.type_id == type_id)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Instantiates every registered override against `context`.
    pub(crate) fn build_slots(&self, context: &ContextHandle) -> HashMap<TypeId, Box<dyn Any>> {
        let mut slots = HashMap::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            slots.insert(registration.type_id, (registration.build)(context.clone()));
            debug!(
                "event=uow_registry module=uow status=ok action=override entity={}",
                registration.entity
            );
        }
        slots
    }
}

/// Creates one `UnitOfWork` per logical operation.
///
/// This is the host's single wiring point: store settings plus repository
/// overrides. Each `create` opens a fresh connection owned by the new scope.
pub struct UnitOfWorkFactory {
    config: StoreConfig,
    registry: RepositoryRegistry,
}

impl UnitOfWorkFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            registry: RepositoryRegistry::new(),
        }
    }

    /// Registers a repository override for entity `T`.
    pub fn with_repository<T, R, F>(mut self, factory: F) -> Self
    where
        T: Entity,
        R: Repository<T> + 'static,
        F: Fn(ContextHandle) -> R + 'static,
    {
        self.registry.register::<T, R, F>(factory);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// Opens a scope connection and returns a unit of work that owns it.
    ///
    /// # Errors
    /// - `UowError::Connection` when the store cannot be opened or its
    ///   schema hook fails.
    pub fn create(&self) -> UowResult<UnitOfWork> {
        let conn = open_connection(&self.config).map_err(|err| {
            error!(
                "event=uow_create module=uow status=error error_code=connection_error error={}",
                err
            );
            UowError::Connection(err)
        })?;
        debug!(
            "event=uow_create module=uow status=ok action=open mode={} overrides={}",
            self.config.mode(),
            self.registry.len()
        );
        Ok(UnitOfWork::with_registry(conn, &self.registry))
    }
}
