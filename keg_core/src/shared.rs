//! The installed calibration model, shared between the frame loop and the
//! calibration workflow.
//!
//! Readers clone an `Arc` under a short read lock and then work lock-free on
//! an immutable model; writers build a complete model first and install it in
//! one swap, so the frame loop never observes a half-updated model.

use std::sync::{Arc, PoisonError, RwLock};

use crate::calibration::CalibrationModel;

#[derive(Debug, Clone, Default)]
pub struct SharedCalibration {
    inner: Arc<RwLock<Arc<CalibrationModel>>>,
}

impl SharedCalibration {
    pub fn new(model: CalibrationModel) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(model))),
        }
    }

    /// Snapshot of the installed model.
    pub fn load(&self) -> Arc<CalibrationModel> {
        // A poisoned lock still holds a complete model: installs are a single pointer store.
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install `model`, returning the one it replaced.
    pub fn install(&self, model: CalibrationModel) -> Arc<CalibrationModel> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, Arc::new(model))
    }

    /// Build a new model from the installed one and install it.
    pub fn update(&self, f: impl FnOnce(&CalibrationModel) -> CalibrationModel) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(&slot);
        *slot = Arc::new(next);
    }
}
