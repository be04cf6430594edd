//! The meal-ordering facade.
//!
//! `Mealflow` owns a store and a clock and exposes every external operation.
//! Operations are split by concern: `catalog` (patients, recipes), `requests`
//! (the safety-checked meal request transaction) and `trays` (kitchen tray
//! lifecycle).

use crate::config::ServiceConfig;
use crate::error::MealflowError;
use crate::store::{Clock, Repositories, Store};

#[derive(Debug)]
pub struct Mealflow<S, C> {
    pub(crate) store: S,
    pub(crate) clock: C,
    pub(crate) config: ServiceConfig,
}

impl<S: Store, C: Clock> Mealflow<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self::with_config(store, clock, ServiceConfig::default())
    }

    pub fn with_config(store: S, clock: C, config: ServiceConfig) -> Self {
        Mealflow {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run `work` as one unit of work, logging whatever makes it fail
    pub(crate) fn unit<T, F>(&self, operation: &'static str, work: F) -> Result<T, MealflowError>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, MealflowError>,
    {
        let _span = tracing::debug_span!("unit_of_work", operation).entered();
        self.store
            .atomically(work)
            .map_err(|e| e.logged(operation))
    }

    /// Like [`Self::unit`], for work that only reads
    pub(crate) fn read_unit<T, F>(
        &self,
        operation: &'static str,
        work: F,
    ) -> Result<T, MealflowError>
    where
        F: FnOnce(&dyn Repositories) -> Result<T, MealflowError>,
    {
        let _span = tracing::debug_span!("read_unit", operation).entered();
        self.store.read(work).map_err(|e| e.logged(operation))
    }
}
