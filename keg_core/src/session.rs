//! Guided two-point calibration.
//!
//! ```text
//! Idle ─start─► AwaitingEmptyCapture ─capture─► CapturingEmpty ─(bound | proceed)─►
//!   AwaitingLoadedCapture ─capture─► CapturingLoaded ─(bound | proceed)─► Computed
//!   Computed ─persist─► Persisted
//!   any capture / Computed ─(too few samples | degenerate | write error)─► Failed
//! ```
//!
//! The operator drives every transition through plain synchronous calls.
//! Each capture phase ends after `max_samples` accepted samples or once
//! `capture` has elapsed on the session clock, whichever comes first, so a
//! silent source fails the session instead of blocking it.

use std::fmt;
use std::time::{Duration, Instant};

use keg_traits::clock::{Clock, MonotonicClock};

use crate::calibration::{DiscriminatorKey, LinearFit, fit_two_point};
use crate::conditioner::{ConditionerCfg, HampelFilter, Verdict};
use crate::error::{CalibrationError, CapturePhase};
use crate::layout::FieldLayout;
use crate::shared::SharedCalibration;
use crate::stats;
use crate::store::{CalibrationStore, merge_fit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingEmptyCapture,
    CapturingEmpty,
    AwaitingLoadedCapture,
    CapturingLoaded,
    Computed,
    Persisted,
    Failed,
}

impl SessionState {
    pub fn is_capturing(self) -> bool {
        matches!(self, Self::CapturingEmpty | Self::CapturingLoaded)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingEmptyCapture => "awaiting empty capture",
            Self::CapturingEmpty => "capturing empty",
            Self::AwaitingLoadedCapture => "awaiting loaded capture",
            Self::CapturingLoaded => "capturing loaded",
            Self::Computed => "computed",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Bounds of one capture phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBounds {
    /// Fewer accepted samples than this fails the session.
    pub min_samples: usize,
    /// The phase ends once this many samples were accepted.
    pub max_samples: usize,
    /// The phase ends after this long regardless of sample count.
    pub capture: Duration,
}

impl Default for SessionBounds {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_samples: 40,
            capture: Duration::from_millis(4_000),
        }
    }
}

pub struct CalibrationSession<C: Clock = MonotonicClock> {
    key: DiscriminatorKey,
    known_value: f64,
    bounds: SessionBounds,
    clock: C,
    state: SessionState,
    filter: HampelFilter,
    batch: Vec<f64>,
    started: Option<Instant>,
    raw_empty: Option<f64>,
    raw_loaded: Option<f64>,
    fit: Option<LinearFit>,
    error: Option<CalibrationError>,
}

impl<C: Clock> fmt::Debug for CalibrationSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationSession")
            .field("key", &self.key)
            .field("known_value", &self.known_value)
            .field("state", &self.state)
            .field("collected", &self.batch.len())
            .field("raw_empty", &self.raw_empty)
            .field("raw_loaded", &self.raw_loaded)
            .finish_non_exhaustive()
    }
}

impl CalibrationSession<MonotonicClock> {
    pub fn new(key: DiscriminatorKey, known_value: f64, bounds: SessionBounds) -> Self {
        Self::with_clock(
            key,
            known_value,
            bounds,
            &ConditionerCfg::default(),
            MonotonicClock::new(),
        )
    }
}

impl<C: Clock> CalibrationSession<C> {
    /// Session whose capture phases share the outlier settings of the live channel.
    pub fn with_clock(
        key: DiscriminatorKey,
        known_value: f64,
        bounds: SessionBounds,
        outliers: &ConditionerCfg,
        clock: C,
    ) -> Self {
        Self {
            key,
            known_value,
            bounds,
            clock,
            state: SessionState::Idle,
            filter: HampelFilter::new(outliers.outlier_window, outliers.n_sigma),
            batch: Vec::with_capacity(bounds.max_samples),
            started: None,
            raw_empty: None,
            raw_loaded: None,
            fit: None,
            error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn key(&self) -> &DiscriminatorKey {
        &self.key
    }

    pub fn error(&self) -> Option<&CalibrationError> {
        self.error.as_ref()
    }

    pub fn fit(&self) -> Option<LinearFit> {
        self.fit
    }

    pub fn raw_empty(&self) -> Option<f64> {
        self.raw_empty
    }

    pub fn raw_loaded(&self) -> Option<f64> {
        self.raw_loaded
    }

    /// Accepted samples in the current capture phase.
    pub fn collected(&self) -> usize {
        self.batch.len()
    }

    fn expect_state(&self, want: SessionState, op: &str) -> Result<(), CalibrationError> {
        if self.state == want {
            Ok(())
        } else {
            Err(CalibrationError::InvalidState(format!(
                "cannot {op} while {}",
                self.state
            )))
        }
    }

    fn fail(&mut self, e: CalibrationError) -> CalibrationError {
        tracing::warn!(key = %self.key, error = %e, "calibration failed");
        self.state = SessionState::Failed;
        self.error = Some(e.clone());
        self.started = None;
        e
    }

    /// Idle -> AwaitingEmptyCapture.
    pub fn start(&mut self) -> Result<SessionState, CalibrationError> {
        self.expect_state(SessionState::Idle, "start")?;
        if !(self.known_value.is_finite() && self.known_value != 0.0) {
            return Err(CalibrationError::InvalidState(format!(
                "known value must be finite and non-zero, got {}",
                self.known_value
            )));
        }
        self.state = SessionState::AwaitingEmptyCapture;
        tracing::info!(key = %self.key, known = self.known_value, "calibration started");
        Ok(self.state)
    }

    /// Operator signal "now capture": begins the pending capture phase.
    pub fn capture(&mut self) -> Result<SessionState, CalibrationError> {
        let next = match self.state {
            SessionState::AwaitingEmptyCapture => SessionState::CapturingEmpty,
            SessionState::AwaitingLoadedCapture => SessionState::CapturingLoaded,
            _ => {
                return Err(CalibrationError::InvalidState(format!(
                    "cannot capture while {}",
                    self.state
                )));
            }
        };
        self.filter.reset();
        self.batch.clear();
        self.started = Some(self.clock.now());
        self.state = next;
        tracing::debug!(key = %self.key, state = %self.state, "capture begun");
        Ok(self.state)
    }

    fn deadline_passed(&self) -> bool {
        self.started
            .is_some_and(|t| self.clock.now().saturating_duration_since(t) >= self.bounds.capture)
    }

    /// Feed one raw reading. Ignored outside a capture phase.
    pub fn offer(&mut self, raw: i64) -> Result<SessionState, CalibrationError> {
        if !self.state.is_capturing() {
            return Ok(self.state);
        }
        if self.deadline_passed() {
            return self.finish_phase();
        }
        match self.filter.check(raw) {
            Verdict::Accepted => self.batch.push(raw as f64),
            Verdict::Rejected { median, mad } => {
                tracing::debug!(raw, median, mad, "capture sample rejected");
            }
        }
        if self.batch.len() >= self.bounds.max_samples {
            return self.finish_phase();
        }
        Ok(self.state)
    }

    /// Check the capture deadline without a new sample.
    pub fn tick(&mut self) -> Result<SessionState, CalibrationError> {
        if self.state.is_capturing() && self.deadline_passed() {
            return self.finish_phase();
        }
        Ok(self.state)
    }

    /// Operator signal "now proceed": ends the running capture phase early.
    pub fn proceed(&mut self) -> Result<SessionState, CalibrationError> {
        if !self.state.is_capturing() {
            return Err(CalibrationError::InvalidState(format!(
                "cannot proceed while {}",
                self.state
            )));
        }
        self.finish_phase()
    }

    fn finish_phase(&mut self) -> Result<SessionState, CalibrationError> {
        let phase = if self.state == SessionState::CapturingEmpty {
            CapturePhase::Empty
        } else {
            CapturePhase::Loaded
        };
        self.started = None;
        let got = self.batch.len();
        if got < self.bounds.min_samples {
            return Err(self.fail(CalibrationError::InsufficientSamples {
                phase,
                got,
                need: self.bounds.min_samples,
            }));
        }
        let Some(median) = stats::median_in_place(&mut self.batch) else {
            return Err(self.fail(CalibrationError::InsufficientSamples {
                phase,
                got: 0,
                need: self.bounds.min_samples.max(1),
            }));
        };
        tracing::info!(key = %self.key, %phase, samples = got, median, "capture complete");

        match phase {
            CapturePhase::Empty => {
                self.raw_empty = Some(median);
                self.state = SessionState::AwaitingLoadedCapture;
            }
            CapturePhase::Loaded => {
                self.raw_loaded = Some(median);
                self.state = SessionState::Computed;
                let raw_empty = self.raw_empty.unwrap_or(median);
                match fit_two_point(raw_empty, median, self.known_value) {
                    Ok(fit) => {
                        tracing::info!(
                            key = %self.key,
                            slope = fit.slope,
                            intercept = fit.intercept,
                            "calibration computed"
                        );
                        self.fit = Some(fit);
                    }
                    Err(e) => return Err(self.fail(e)),
                }
            }
        }
        Ok(self.state)
    }

    /// Computed -> Persisted. Merges the fit for this key into `store` and,
    /// when given, installs it into the live model. On a write error the
    /// session fails and the live model is untouched.
    pub fn persist<S: CalibrationStore + ?Sized>(
        &mut self,
        store: &mut S,
        layout: Option<&FieldLayout>,
        live: Option<&SharedCalibration>,
    ) -> Result<LinearFit, CalibrationError> {
        self.expect_state(SessionState::Computed, "persist")?;
        let Some(fit) = self.fit else {
            return Err(self.fail(CalibrationError::InvalidState(
                "computed session has no fit".into(),
            )));
        };
        if let Err(e) = merge_fit(store, &self.key, fit, layout) {
            return Err(self.fail(CalibrationError::Persist(format!("{e:#}"))));
        }
        if let Some(shared) = live {
            let key = self.key.clone();
            shared.update(|m| m.clone().with_fit(key, fit));
        }
        self.state = SessionState::Persisted;
        Ok(fit)
    }

    /// Back to Idle, dropping everything captured.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.filter.reset();
        self.batch.clear();
        self.started = None;
        self.raw_empty = None;
        self.raw_loaded = None;
        self.fit = None;
        self.error = None;
    }
}
