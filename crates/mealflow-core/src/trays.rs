//! Kitchen trays.
//!
//! A tray is created with its finalized meal request and only ever moves one
//! status forward at a time.

use crate::error::MealflowError;
use crate::model::{TrayId, TrayView};
use crate::service::Mealflow;
use crate::store::{Clock, Store};

impl<S: Store, C: Clock> Mealflow<S, C> {
    /// Every tray with its request and patient, newest first
    pub fn list_trays(&self) -> Result<Vec<TrayView>, MealflowError> {
        self.read_unit("list_trays", |repos| Ok(repos.list_trays()?))
    }

    /// Move a tray to the next lifecycle status and stamp the time it entered it.
    ///
    /// Fails with `InvalidState` once the tray has been retrieved; the stored
    /// tray is not touched in that case.
    pub fn advance_tray(&self, id: &TrayId) -> Result<TrayView, MealflowError> {
        let now = self.clock.now();
        self.unit("advance_tray", |repos| {
            let mut tray = repos
                .find_tray(id)?
                .ok_or_else(|| MealflowError::not_found("Tray"))?;
            let from = tray.status;
            let to = tray.advance(now)?;
            repos.save_tray(&tray)?;
            tracing::info!(tray_id = %tray.id, %from, %to, "tray advanced");

            repos
                .find_tray_view(id)?
                .ok_or_else(|| MealflowError::not_found("Tray"))
        })
    }
}
