//! Type-state builder for `Monitor`.
//!
//! `build()` is only available once a layout and a weight channel are set;
//! `try_build()` works in any state and reports what is missing.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::calibration::CalibrationModel;
use crate::conditioner::ConditionerCfg;
use crate::decoder::FrameDecoder;
use crate::error::{BuildError, LayoutError, Result};
use crate::layout::FieldLayout;
use crate::monitor::{ChannelMap, Monitor, SourceFilter};
use crate::shared::SharedCalibration;
use crate::units::{BatteryMap, TempMap};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct MonitorBuilder<L, W> {
    layout: Option<Arc<FieldLayout>>,
    channels: Option<ChannelMap>,
    filter: SourceFilter,
    conditioner: ConditionerCfg,
    calibration: Option<SharedCalibration>,
    temp_comp: bool,
    auto_tare_samples: usize,
    _l: PhantomData<L>,
    _w: PhantomData<W>,
}

impl Default for MonitorBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            layout: None,
            channels: None,
            filter: SourceFilter::default(),
            conditioner: ConditionerCfg::default(),
            calibration: None,
            temp_comp: false,
            auto_tare_samples: 0,
            _l: PhantomData,
            _w: PhantomData,
        }
    }
}

impl Monitor {
    pub fn builder() -> MonitorBuilder<Missing, Missing> {
        MonitorBuilder::default()
    }
}

impl<L, W> MonitorBuilder<L, W> {
    fn retype<L2, W2>(self) -> MonitorBuilder<L2, W2> {
        MonitorBuilder {
            layout: self.layout,
            channels: self.channels,
            filter: self.filter,
            conditioner: self.conditioner,
            calibration: self.calibration,
            temp_comp: self.temp_comp,
            auto_tare_samples: self.auto_tare_samples,
            _l: PhantomData,
            _w: PhantomData,
        }
    }

    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<Monitor> {
        let layout = self
            .layout
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLayout))?;
        let channels = self
            .channels
            .ok_or_else(|| eyre::Report::new(BuildError::MissingWeight))?;
        if let Some(name) = channels.field_names().find(|n| !layout.contains(n)) {
            return Err(eyre::Report::new(LayoutError::UnknownField(name.to_string())));
        }
        self.conditioner.validate().map_err(eyre::Report::new)?;

        Ok(Monitor::from_parts(
            FrameDecoder::new(layout),
            channels,
            self.filter,
            self.conditioner,
            self.calibration.unwrap_or_default(),
            self.temp_comp,
            self.auto_tare_samples,
        ))
    }

    // Chainable setters that do not affect type-state.

    pub fn with_conditioner(mut self, cfg: ConditionerCfg) -> Self {
        self.conditioner = cfg;
        self
    }

    pub fn with_source_filter(mut self, filter: SourceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Share an installed model with other parts of the process (calibration workflow).
    pub fn with_shared_calibration(mut self, shared: SharedCalibration) -> Self {
        self.calibration = Some(shared);
        self
    }

    pub fn with_calibration(mut self, model: CalibrationModel) -> Self {
        self.calibration = Some(SharedCalibration::new(model));
        self
    }

    pub fn with_temp_compensation(mut self, on: bool) -> Self {
        self.temp_comp = on;
        self
    }

    pub fn with_auto_tare(mut self, samples: usize) -> Self {
        self.auto_tare_samples = samples;
        self
    }
}

impl<W> MonitorBuilder<Missing, W> {
    pub fn with_layout(mut self, layout: impl Into<Arc<FieldLayout>>) -> MonitorBuilder<Set, W> {
        self.layout = Some(layout.into());
        self.retype()
    }
}

impl<L> MonitorBuilder<L, Missing> {
    pub fn with_channels(mut self, channels: ChannelMap) -> MonitorBuilder<L, Set> {
        self.channels = Some(channels);
        self.retype()
    }

    pub fn with_weight_field(self, field: impl Into<Arc<str>>) -> MonitorBuilder<L, Set> {
        self.with_channels(ChannelMap::weight(field))
    }
}

impl<L> MonitorBuilder<L, Set> {
    pub fn with_discriminator(mut self, field: impl Into<Arc<str>>) -> Self {
        if let Some(c) = self.channels.as_mut() {
            c.discriminator = Some(field.into());
        }
        self
    }

    pub fn with_temperature(mut self, field: impl Into<Arc<str>>, map: TempMap) -> Self {
        if let Some(c) = self.channels.as_mut() {
            c.temperature = Some((field.into(), map));
        }
        self
    }

    pub fn with_battery(mut self, field: impl Into<Arc<str>>, map: BatteryMap) -> Self {
        if let Some(c) = self.channels.as_mut() {
            c.battery = Some((field.into(), map));
        }
        self
    }
}

impl MonitorBuilder<Set, Set> {
    /// Validate and build. Only available once layout and weight channel are set.
    pub fn build(self) -> Result<Monitor> {
        self.try_build()
    }
}
