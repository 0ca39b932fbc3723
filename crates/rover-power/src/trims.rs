//! Persisted joint init angles ("servo trims").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rover_types::RoverError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::persist;

/// On-disk shape: `{"init_angles": {"0": 90.0, "1": 92.0, ..}}`, keyed by
/// servo channel.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TrimDocument {
    init_angles: BTreeMap<u8, f32>,
}

/// Single-writer store for the init angle of every servo channel.
pub struct ServoTrimStore {
    path: PathBuf,
    angles: Mutex<BTreeMap<u8, f32>>,
}

impl ServoTrimStore {
    /// Open the document at `path`. Channels it does not mention take their
    /// angle from `defaults`; a missing document is created from them.
    pub fn open(path: impl AsRef<Path>, defaults: BTreeMap<u8, f32>) -> Result<Self, RoverError> {
        let path = path.as_ref().to_path_buf();
        let doc = persist::load_or_init(&path, || TrimDocument {
            init_angles: defaults.clone(),
        })?;
        let mut angles = defaults;
        angles.extend(doc.init_angles);
        Ok(Self {
            path,
            angles: Mutex::new(angles),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, f32>> {
        self.angles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> BTreeMap<u8, f32> {
        self.lock().clone()
    }

    /// Persist the init angle of one channel.
    pub fn save(&self, channel: u8, angle: f32) -> Result<(), RoverError> {
        let mut angles = self.lock();
        let mut next = angles.clone();
        next.insert(channel, angle);
        persist::save_atomic(&self.path, &TrimDocument {
            init_angles: next.clone(),
        })?;
        *angles = next;
        info!(channel, angle, "servo init angle saved");
        Ok(())
    }

    /// Replace every persisted init angle.
    pub fn save_all(&self, angles: &BTreeMap<u8, f32>) -> Result<(), RoverError> {
        let mut current = self.lock();
        persist::save_atomic(&self.path, &TrimDocument {
            init_angles: angles.clone(),
        })?;
        *current = angles.clone();
        Ok(())
    }
}
