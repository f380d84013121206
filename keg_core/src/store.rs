//! Persistence of calibration models.
//!
//! Stores hold the whole persisted document. Writing one discriminator's fit
//! goes through `merge_fit`, which keeps every other key already stored.

use std::path::{Path, PathBuf};

use keg_config::{LayoutCfg, PersistedCalibration, PersistedFit};

use crate::atomic::write_atomic;
use crate::calibration::{CalibrationModel, DiscriminatorKey, LinearFit};
use crate::error::Result;
use crate::layout::FieldLayout;

pub trait CalibrationStore {
    /// `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<PersistedCalibration>>;
    fn save(&mut self, doc: &PersistedCalibration) -> Result<()>;
}

impl<T: CalibrationStore + ?Sized> CalibrationStore for &mut T {
    fn load(&self) -> Result<Option<PersistedCalibration>> {
        (**self).load()
    }
    fn save(&mut self, doc: &PersistedCalibration) -> Result<()> {
        (**self).save(doc)
    }
}

/// JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedCalibration>> {
        keg_config::load_calibration_json(&self.path)
    }

    fn save(&mut self, doc: &PersistedCalibration) -> Result<()> {
        let json = doc.to_json_pretty()?;
        write_atomic(&self.path, json.as_bytes())
            .map_err(|e| eyre::eyre!("write calibration {:?}: {}", self.path, e))?;
        tracing::info!(path = %self.path.display(), keys = doc.points.len(), "calibration saved");
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub doc: Option<PersistedCalibration>,
    pub saves: usize,
}

impl CalibrationStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedCalibration>> {
        Ok(self.doc.clone())
    }

    fn save(&mut self, doc: &PersistedCalibration) -> Result<()> {
        self.doc = Some(doc.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Write `fit` for `key`, keeping all other stored keys. Returns the model
/// that was persisted.
pub fn merge_fit<S: CalibrationStore + ?Sized>(
    store: &mut S,
    key: &DiscriminatorKey,
    fit: LinearFit,
    layout: Option<&FieldLayout>,
) -> Result<CalibrationModel> {
    update_doc(store, layout, |doc| {
        doc.points.insert(
            key.as_str().to_string(),
            PersistedFit {
                slope: fit.slope,
                intercept: fit.intercept,
            },
        );
    })
}

/// Persist a tare offset (or clear it with `None`), keeping all fits.
pub fn save_tare<S: CalibrationStore + ?Sized>(
    store: &mut S,
    tare: Option<f64>,
) -> Result<CalibrationModel> {
    update_doc(store, None, |doc| doc.tare_offset = tare)
}

fn update_doc<S: CalibrationStore + ?Sized>(
    store: &mut S,
    layout: Option<&FieldLayout>,
    edit: impl FnOnce(&mut PersistedCalibration),
) -> Result<CalibrationModel> {
    let mut doc = store.load()?.unwrap_or_default();
    edit(&mut doc);
    if let Some(l) = layout {
        doc.parser = Some(LayoutCfg::from(l));
    }
    doc.touch();
    store.save(&doc)?;
    Ok(CalibrationModel::from(&doc))
}

/// How a persisted calibration relates to the active layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMatch {
    Matches,
    /// The file records no layout (older tooling).
    Unrecorded,
    /// Fitted under a different layout; raw counts may mean something else now.
    Stale,
}

pub fn check_layout(doc: &PersistedCalibration, active: &FieldLayout) -> LayoutMatch {
    match &doc.parser {
        None => LayoutMatch::Unrecorded,
        Some(p) if *p == LayoutCfg::from(active) => LayoutMatch::Matches,
        Some(_) => LayoutMatch::Stale,
    }
}

/// Load the stored model for `active`. A stale layout descriptor is logged
/// and the model is still returned.
pub fn load_model<S: CalibrationStore + ?Sized>(
    store: &S,
    active: &FieldLayout,
) -> Result<Option<(CalibrationModel, LayoutMatch)>> {
    let Some(doc) = store.load()? else {
        return Ok(None);
    };
    let status = check_layout(&doc, active);
    if status == LayoutMatch::Stale {
        tracing::warn!("persisted calibration was fitted under a different layout; applying anyway");
    }
    Ok(Some((CalibrationModel::from(&doc), status)))
}
