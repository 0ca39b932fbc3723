//! Persisted shoulder servo calibration.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rover_types::{RoverError, ShoulderCalibration};
use serde::{Deserialize, Serialize};

use crate::persist;

/// On-disk shape: `{"shoulder": {"base_angle": .., "raise_angle": ..}}`.
#[derive(Debug, Serialize, Deserialize)]
struct ServoDocument {
    shoulder: ShoulderCalibration,
}

/// Single-writer store for the shoulder calibration.
pub struct ShoulderCalibrationStore {
    path: PathBuf,
    current: Mutex<ShoulderCalibration>,
}

impl ShoulderCalibrationStore {
    pub fn open(
        path: impl AsRef<Path>,
        defaults: ShoulderCalibration,
    ) -> Result<Self, RoverError> {
        let path = path.as_ref().to_path_buf();
        let doc = persist::load_or_init(&path, || ServoDocument {
            shoulder: defaults.clamped(),
        })?;
        Ok(Self {
            path,
            current: Mutex::new(doc.shoulder.clamped()),
        })
    }

    pub fn get(&self) -> ShoulderCalibration {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clamp `requested`, persist it, and return what was stored.
    pub fn update(&self, requested: ShoulderCalibration) -> Result<ShoulderCalibration, RoverError> {
        let next = requested.clamped();
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        persist::save_atomic(&self.path, &ServoDocument { shoulder: next })?;
        *current = next;
        Ok(next)
    }
}
