// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::storage::{KeyValueStore, StorageError, StoredKey};
use crate::weight::LoadCellSensor;
use embedded_hal_async::delay::DelayNs;

pub const DEFAULT_EMPTY_OFFSET: i64 = 0;
/// The cell hangs in tension, so a full hopper reads below an empty one.
pub const DEFAULT_FULL_OFFSET: i64 = -420_000;

const FULL_TARE_SAMPLES: i64 = 10;
const FULL_TARE_SPACING_MS: u32 = 10;
const READY_POLL_MS: u32 = 1;
const READY_TIMEOUT_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationRole {
    Empty,
    Full,
}

impl CalibrationRole {
    pub const ALL: [CalibrationRole; 2] = [CalibrationRole::Empty, CalibrationRole::Full];

    pub fn name(self) -> &'static str {
        match self {
            CalibrationRole::Empty => "empty",
            CalibrationRole::Full => "full",
        }
    }

    fn key(self) -> StoredKey {
        match self {
            CalibrationRole::Empty => StoredKey::EmptyOffset,
            CalibrationRole::Full => StoredKey::FullRaw,
        }
    }

    fn default_offset(self) -> i64 {
        match self {
            CalibrationRole::Empty => DEFAULT_EMPTY_OFFSET,
            CalibrationRole::Full => DEFAULT_FULL_OFFSET,
        }
    }

    fn index(self) -> usize {
        match self {
            CalibrationRole::Empty => 0,
            CalibrationRole::Full => 1,
        }
    }
}

/// Raw sensor output at the two ends of the scale. `full_offset` is an absolute raw reading and
/// may sit on either side of `empty_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationState {
    pub empty_offset: i64,
    pub full_offset: i64,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            empty_offset: DEFAULT_EMPTY_OFFSET,
            full_offset: DEFAULT_FULL_OFFSET,
        }
    }
}

impl CalibrationState {
    /// A zero width range cannot be scaled.
    pub fn is_valid(&self) -> bool {
        self.full_offset != self.empty_offset
    }

    pub fn get(&self, role: CalibrationRole) -> i64 {
        match role {
            CalibrationRole::Empty => self.empty_offset,
            CalibrationRole::Full => self.full_offset,
        }
    }

    fn set(&mut self, role: CalibrationRole, value: i64) {
        match role {
            CalibrationRole::Empty => self.empty_offset = value,
            CalibrationRole::Full => self.full_offset = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError<E> {
    Sensor(E),
    /// The sensor never reported a conversion within the readiness bound.
    SensorTimeout,
    /// The value was captured and is in use, but is not yet durable.
    Storage(StorageError),
}

/// Owns the calibration endpoints and keeps them in step with the key/value store.
///
/// A failed write leaves the role pending. Pending roles are written again on the next mutation
/// or on [`CalibrationStore::flush`].
pub struct CalibrationStore {
    state: CalibrationState,
    pending: [bool; 2],
}

impl CalibrationStore {
    pub async fn load<S: KeyValueStore>(store: &mut S) -> Self {
        let mut state = CalibrationState::default();

        for role in CalibrationRole::ALL {
            let value = store
                .get_long(role.key(), role.default_offset())
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        "Unable to load {} calibration, using default: {:?}",
                        role.name(),
                        e
                    );
                    role.default_offset()
                });
            state.set(role, value);
        }

        info!(
            "Loaded calibration: empty = {}, full = {}",
            state.empty_offset,
            state.full_offset
        );
        if !state.is_valid() {
            warn!("Stored calibration has equal endpoints, readings will not be scaled");
        }

        Self {
            state,
            pending: [false; 2],
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn offset(&self, role: CalibrationRole) -> i64 {
        self.state.get(role)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.pending.iter().any(|p| *p)
    }

    pub fn discard_pending(&mut self) {
        self.pending = [false; 2];
    }

    /// Administrative override. The value is live immediately even if persisting it fails.
    pub async fn set<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        role: CalibrationRole,
        value: i64,
    ) -> Result<(), StorageError> {
        self.state.set(role, value);
        self.pending[role.index()] = true;
        info!("Calibration {} set to {}", role.name(), value);
        self.flush(store).await
    }

    /// Captures the current sensor output as the `role` endpoint and persists it.
    ///
    /// `Empty` takes one sample. `Full` averages ten samples spaced 10 ms apart, truncating
    /// toward zero. Nothing changes if sampling fails.
    pub async fn tare<S, L, D>(
        &mut self,
        store: &mut S,
        sensor: &mut L,
        delay: &mut D,
        role: CalibrationRole,
    ) -> Result<i64, CalibrationError<L::Error>>
    where
        S: KeyValueStore,
        L: LoadCellSensor,
        D: DelayNs,
    {
        let value = match role {
            CalibrationRole::Empty => next_sample(sensor, delay).await?,
            CalibrationRole::Full => {
                // the mean of i64 samples always fits back into an i64
                let mut sum: i128 = 0;
                for i in 0..FULL_TARE_SAMPLES {
                    if i > 0 {
                        delay.delay_ms(FULL_TARE_SPACING_MS).await;
                    }
                    sum += i128::from(next_sample(sensor, delay).await?);
                }
                (sum / i128::from(FULL_TARE_SAMPLES)) as i64
            }
        };

        debug!("Tare {} captured raw {}", role.name(), value);
        self.set(store, role, value)
            .await
            .map_err(CalibrationError::Storage)?;
        Ok(value)
    }

    /// Writes every pending role. Roles that fail stay pending.
    pub async fn flush<S: KeyValueStore>(&mut self, store: &mut S) -> Result<(), StorageError> {
        let mut result = Ok(());
        for role in CalibrationRole::ALL {
            if !self.pending[role.index()] {
                continue;
            }
            match store.put_long(role.key(), self.state.get(role)).await {
                Ok(()) => self.pending[role.index()] = false,
                Err(e) => {
                    warn!("Unable to store {} calibration: {:?}", role.name(), e);
                    result = Err(e);
                }
            }
        }
        result
    }
}

async fn next_sample<L, D>(sensor: &mut L, delay: &mut D) -> Result<i64, CalibrationError<L::Error>>
where
    L: LoadCellSensor,
    D: DelayNs,
{
    for _ in 0..READY_TIMEOUT_MS / READY_POLL_MS {
        if sensor.is_ready().map_err(CalibrationError::Sensor)? {
            return sensor.read().map_err(CalibrationError::Sensor);
        }
        delay.delay_ms(READY_POLL_MS).await;
    }
    warn!("Load cell not ready after {} ms", READY_TIMEOUT_MS);
    Err(CalibrationError::SensorTimeout)
}
