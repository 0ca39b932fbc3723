//! [`CalibrationStore`] – the persisted battery calibration record.
//!
//! Updates are revision-checked: a caller that read revision `n` may only
//! commit while the store is still at `n`. Every commit bumps the revision
//! by exactly one and is written atomically before it becomes visible.

use std::path::{Path, PathBuf};

use rover_types::{CalibrationRecord, RoverError};
use tracing::info;

use crate::persist;

/// Calibration record for a divider whose full-scale reading equals
/// `nominal_volts`.
pub fn nominal_record(
    full_scale: u16,
    nominal_volts: f64,
    min_voltage: f64,
    max_voltage: f64,
) -> CalibrationRecord {
    CalibrationRecord {
        scale: nominal_volts / f64::from(full_scale.max(1)),
        offset: 0.0,
        min_voltage,
        max_voltage,
        revision: 0,
    }
}

#[derive(Debug)]
pub struct CalibrationStore {
    path: PathBuf,
    record: CalibrationRecord,
}

impl CalibrationStore {
    /// Load the record at `path`, creating it from `defaults` if absent. A
    /// stored record that fails validation is replaced by `defaults`.
    pub fn open(path: impl AsRef<Path>, defaults: CalibrationRecord) -> Result<Self, RoverError> {
        let path = path.as_ref().to_path_buf();
        defaults.validate()?;
        let mut record = persist::load_or_init(&path, || defaults.clone())?;
        if let Err(e) = record.validate() {
            tracing::warn!(path = %path.display(), error = %e, "stored calibration invalid, using defaults");
            record = CalibrationRecord {
                revision: record.revision,
                ..defaults
            };
        }
        Ok(Self { path, record })
    }

    pub fn record(&self) -> &CalibrationRecord {
        &self.record
    }

    pub fn revision(&self) -> u64 {
        self.record.revision
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the record and commit it.
    ///
    /// # Errors
    ///
    /// - [`RoverError::StaleRevision`] when `expected_revision` is given and
    ///   differs from the current revision.
    /// - [`RoverError::InvalidCalibration`] when the result breaks the record
    ///   invariants.
    /// - [`RoverError::Persistence`] when the write fails. The in-memory
    ///   record is unchanged in every error case.
    pub fn update<F>(
        &mut self,
        expected_revision: Option<u64>,
        mutate: F,
    ) -> Result<CalibrationRecord, RoverError>
    where
        F: FnOnce(&mut CalibrationRecord),
    {
        let current = self.record.revision;
        if let Some(expected) = expected_revision {
            if expected != current {
                return Err(RoverError::StaleRevision { expected, current });
            }
        }
        let mut next = self.record.clone();
        mutate(&mut next);
        next.revision = current + 1;
        next.validate()?;
        persist::save_atomic(&self.path, &next)?;
        info!(revision = next.revision, scale = next.scale, "calibration committed");
        self.record = next.clone();
        Ok(next)
    }
}
