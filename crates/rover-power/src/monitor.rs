//! [`BatteryMonitor`] – the single mutation path for battery state.
//!
//! The acquisition task feeds raw ADC counts in with
//! [`BatteryMonitor::ingest`]; the calibration surface calls
//! [`BatteryMonitor::calibrate`]. Both take the same lock, so a calibration
//! never interleaves with a sample. Readers subscribe to the watch channel
//! and always see the latest committed estimate.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rover_types::{BatteryEstimate, CalibrationRecord, CalibrationView, RoverError};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::calibration::CalibrationStore;
use crate::filter::{FilterConfig, VoltageFilter};
use crate::percent::PercentageCurve;

/// Voltage change below which two estimates are considered equal.
pub const VOLTAGE_TOLERANCE: f64 = 0.01;

const NO_READING: &str = "Unable to read battery voltage for calibration";

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub filter: FilterConfig,
    pub curve: PercentageCurve,
    /// Volts per ADC count of the uncalibrated divider.
    pub nominal_scale: f64,
    /// Consecutive failed reads after which the estimate turns stale.
    pub stale_after_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            curve: PercentageCurve::Linear,
            nominal_scale: 8.4 / f64::from(u16::MAX),
            stale_after_failures: 5,
        }
    }
}

/// Result of a successful one-point calibration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub calibration: CalibrationRecord,
    /// Voltage the operator measured.
    pub actual_voltage: f64,
    /// Smoothed reading expressed in raw ADC counts.
    pub raw_sample: f64,
    pub estimate: BatteryEstimate,
}

struct State {
    filter: VoltageFilter,
    store: CalibrationStore,
    failures: u32,
    estimate: BatteryEstimate,
}

pub struct BatteryMonitor {
    config: MonitorConfig,
    state: Mutex<State>,
    tx: watch::Sender<BatteryEstimate>,
}

impl BatteryMonitor {
    pub fn new(config: MonitorConfig, store: CalibrationStore) -> Self {
        let (tx, _rx) = watch::channel(BatteryEstimate::default());
        Self {
            state: Mutex::new(State {
                filter: VoltageFilter::new(config.filter),
                store,
                failures: 0,
                estimate: BatteryEstimate::default(),
            }),
            config,
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> watch::Receiver<BatteryEstimate> {
        self.tx.subscribe()
    }

    /// Latest published estimate.
    pub fn estimate(&self) -> BatteryEstimate {
        self.tx.borrow().clone()
    }

    pub fn calibration(&self) -> CalibrationRecord {
        self.lock().store.record().clone()
    }

    /// Current calibration together with the live smoothed voltage.
    pub fn calibration_view(&self) -> CalibrationView {
        let state = self.lock();
        let calibration = state.store.record().clone();
        CalibrationView {
            voltage: state.estimate.voltage,
            raw_voltage: state.estimate.raw_voltage,
            revision: calibration.revision,
            calibration,
        }
    }

    /// Feed one raw ADC reading and publish the new estimate.
    pub fn ingest(&self, raw: u16) -> BatteryEstimate {
        let mut state = self.lock();
        let cal = state.store.record().clone();
        let volts = f64::from(raw) * cal.scale + cal.offset;
        let smoothed = state.filter.push(volts);
        state.failures = 0;
        state.estimate = self.estimate_for(smoothed, &cal);
        self.tx.send_replace(state.estimate.clone());
        state.estimate.clone()
    }

    /// Record a failed ADC read. After `stale_after_failures` consecutive
    /// failures the estimate turns stale and the percentage is withheld.
    pub fn record_failure(&self, error: &RoverError) -> BatteryEstimate {
        let mut state = self.lock();
        state.failures = state.failures.saturating_add(1);
        if state.failures == self.config.stale_after_failures {
            warn!(failures = state.failures, error = %error, "battery acquisition unavailable");
        }
        if state.failures >= self.config.stale_after_failures && !state.estimate.stale {
            Self::make_stale(&mut state.estimate);
            self.tx.send_replace(state.estimate.clone());
        }
        state.estimate.clone()
    }

    /// Force the estimate stale, e.g. when no sample arrived in time.
    pub fn mark_stale(&self) -> BatteryEstimate {
        let mut state = self.lock();
        if !state.estimate.stale {
            Self::make_stale(&mut state.estimate);
            self.tx.send_replace(state.estimate.clone());
        }
        state.estimate.clone()
    }

    fn make_stale(estimate: &mut BatteryEstimate) {
        estimate.stale = true;
        estimate.percentage = None;
    }

    /// One-point calibration: rescale so the current smoothed reading maps
    /// exactly to `measured_voltage`. The offset is kept.
    ///
    /// # Errors
    ///
    /// - [`RoverError::InvalidCalibration`] for a non-positive voltage.
    /// - [`RoverError::AcquisitionUnavailable`] without a usable reading.
    /// - [`RoverError::StaleRevision`] when `expected_revision` is outdated.
    /// - [`RoverError::Persistence`] when the record cannot be written.
    #[instrument(skip(self))]
    pub fn calibrate(
        &self,
        measured_voltage: f64,
        expected_revision: Option<u64>,
    ) -> Result<CalibrationOutcome, RoverError> {
        if !(measured_voltage.is_finite() && measured_voltage > 0.0) {
            return Err(RoverError::InvalidCalibration(
                "Voltage must be greater than zero".into(),
            ));
        }
        let mut state = self.lock();
        let smoothed = match state.filter.current() {
            Some(v) if !state.estimate.stale => v,
            _ => return Err(RoverError::AcquisitionUnavailable(NO_READING.into())),
        };
        let old = state.store.record().clone();
        let raw_sample = (smoothed - old.offset) / old.scale;
        if !(raw_sample.is_finite() && raw_sample > 0.0) {
            return Err(RoverError::AcquisitionUnavailable(NO_READING.into()));
        }
        let scale = (measured_voltage - old.offset) / raw_sample;

        let calibration = state.store.update(expected_revision, |r| r.scale = scale)?;

        let ratio = calibration.scale / old.scale;
        let offset = old.offset;
        state.filter.remap(|v| (v - offset) * ratio + offset);
        let smoothed = state.filter.current().unwrap_or(measured_voltage);
        state.estimate = self.estimate_for(smoothed, &calibration);
        self.tx.send_replace(state.estimate.clone());

        info!(
            measured_voltage,
            raw_sample,
            scale = calibration.scale,
            revision = calibration.revision,
            "battery calibrated"
        );
        Ok(CalibrationOutcome {
            calibration,
            actual_voltage: measured_voltage,
            raw_sample,
            estimate: state.estimate.clone(),
        })
    }

    fn estimate_for(&self, smoothed: f64, cal: &CalibrationRecord) -> BatteryEstimate {
        let raw_counts = (smoothed - cal.offset) / cal.scale;
        BatteryEstimate {
            voltage: smoothed,
            raw_voltage: raw_counts * self.config.nominal_scale,
            percentage: Some(self.config.curve.percentage(smoothed, cal)),
            stale: false,
            updated_at: Some(Utc::now()),
        }
    }
}

/// Whether `next` differs enough from `prev` to be pushed to operators.
pub fn significant_change(prev: &BatteryEstimate, next: &BatteryEstimate) -> bool {
    prev.stale != next.stale
        || prev.percentage != next.percentage
        || (prev.voltage - next.voltage).abs() >= VOLTAGE_TOLERANCE
        || (prev.raw_voltage - next.raw_voltage).abs() >= VOLTAGE_TOLERANCE
}
