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

//! Periodic sampling and scaling of the load cell.

use crate::storage::{KeyValueStore, StorageError, StoredKey, StoredValue};
use crate::weight::LoadCellSensor;
use crate::weight::calibration::CalibrationState;
use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};

pub const MIN_INTERVAL_MS: u32 = 200;
pub const MAX_INTERVAL_MS: u32 = 10_000;
pub const DEFAULT_INTERVAL_MS: u32 = 1000;

/// How long a due sample may wait on the sensor before sampling stops for the session.
pub const SENSOR_TIMEOUT: Duration = Duration::from_secs(3);

const SCALE_MIN: i64 = 0;
const SCALE_MAX: i64 = 100;

/// Re-maps `x` from `in_min..in_max` onto `out_min..out_max`, truncating toward zero. Works for
/// reversed input ranges. Returns `None` for a zero width input range.
pub fn linear_map(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> Option<i64> {
    let span = i128::from(in_max) - i128::from(in_min);
    if span == 0 {
        return None;
    }
    let mapped = (i128::from(x) - i128::from(in_min)) * (i128::from(out_max) - i128::from(out_min))
        / span
        + i128::from(out_min);
    Some(mapped.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
}

/// Raw reading to a 0 to 100 fill level, `None` when the calibration cannot be used.
pub fn scale(raw: i64, calibration: &CalibrationState) -> Option<u8> {
    if !calibration.is_valid() {
        return None;
    }
    linear_map(
        raw,
        calibration.empty_offset,
        calibration.full_offset,
        SCALE_MIN,
        SCALE_MAX,
    )
    .map(|v| v.clamp(SCALE_MIN, SCALE_MAX) as u8)
}

/// Persisted sampling interval, `timerdelay` in milliseconds.
pub struct SamplingConfig {
    interval_ms: u32,
    pending: bool,
}

impl SamplingConfig {
    /// An out of range stored interval is clamped for this session and the default is written
    /// back. A missing one uses the default without writing.
    pub async fn load<S: KeyValueStore>(store: &mut S) -> Self {
        let mut config = Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            pending: false,
        };

        match store.fetch(StoredKey::TimerDelay).await {
            Ok(None) => debug!("No sampling interval stored, using {} ms", DEFAULT_INTERVAL_MS),
            Ok(Some(StoredValue::Int(ms))) => {
                let clamped = clamp_interval(i64::from(ms));
                config.interval_ms = clamped;
                if clamped as i64 != i64::from(ms) {
                    warn!(
                        "Stored interval {} ms out of range, using {} ms and storing default",
                        ms,
                        clamped
                    );
                    config.persist_default(store).await;
                }
            }
            Ok(Some(_)) => {
                warn!("Stored interval has the wrong type, storing default");
                config.persist_default(store).await;
            }
            Err(e) => warn!("Unable to load sampling interval: {:?}", e),
        }

        info!("Sampling interval {} ms", config.interval_ms);
        config
    }

    async fn persist_default<S: KeyValueStore>(&mut self, store: &mut S) {
        if let Err(e) = store
            .put_int(StoredKey::TimerDelay, DEFAULT_INTERVAL_MS as i32)
            .await
        {
            warn!("Unable to store default sampling interval: {:?}", e);
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending
    }

    pub fn discard_pending(&mut self) {
        self.pending = false;
    }

    /// Clamps `ms` into range, applies it and persists it. Returns the applied interval; the
    /// interval stays applied when persisting fails.
    pub async fn set_interval_ms<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        ms: u32,
    ) -> Result<u32, StorageError> {
        self.interval_ms = clamp_interval(i64::from(ms));
        self.pending = true;
        info!("Sampling interval set to {} ms", self.interval_ms);
        self.flush(store).await?;
        Ok(self.interval_ms)
    }

    pub async fn flush<S: KeyValueStore>(&mut self, store: &mut S) -> Result<(), StorageError> {
        if !self.pending {
            return Ok(());
        }
        store
            .put_int(StoredKey::TimerDelay, self.interval_ms as i32)
            .await
            .map_err(|e| {
                warn!("Unable to store sampling interval: {:?}", e);
                e
            })?;
        self.pending = false;
        Ok(())
    }
}

fn clamp_interval(ms: i64) -> u32 {
    ms.clamp(i64::from(MIN_INTERVAL_MS), i64::from(MAX_INTERVAL_MS)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleReading {
    pub raw: i64,
    pub scaled: u8,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PublishedReading {
    pub reading: SampleReading,
    /// Set when a later sample could not be scaled.
    pub stale: bool,
}

/// Most recent reading, shared with code running outside the main loop.
pub struct LatestReading {
    inner: Mutex<CriticalSectionRawMutex, Cell<Option<PublishedReading>>>,
}

impl Default for LatestReading {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestReading {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(None)),
        }
    }

    pub fn publish(&self, reading: SampleReading) {
        self.inner.lock(|cell| {
            cell.set(Some(PublishedReading {
                reading,
                stale: false,
            }))
        });
    }

    pub fn mark_stale(&self) {
        self.inner.lock(|cell| {
            if let Some(mut published) = cell.get() {
                published.stale = true;
                cell.set(Some(published));
            }
        });
    }

    pub fn get(&self) -> Option<PublishedReading> {
        self.inner.lock(|cell| cell.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingState {
    WaitingForInterval,
    /// A sample is due but the sensor has no conversion yet.
    AwaitingSensor { since: Instant },
    DataReady,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleOutcome {
    /// Interval not yet elapsed.
    Idle,
    AwaitingSensor,
    Published(SampleReading),
    /// Calibration endpoints are equal, the previous reading was marked stale.
    ConfigurationError,
    /// The sensor bus failed, sampling retries next interval.
    SensorFault,
    Halted,
    /// Sampling is suspended while the device is in maintenance.
    Skipped,
}

pub struct SamplingEngine {
    state: SamplingState,
    last_event: Option<Instant>,
}

impl Default for SamplingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingEngine {
    pub const fn new() -> Self {
        Self {
            state: SamplingState::WaitingForInterval,
            last_event: None,
        }
    }

    pub fn state(&self) -> SamplingState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == SamplingState::Halted
    }

    /// Runs one step. Never blocks: a sensor without a conversion is checked again next tick.
    pub fn tick<L: LoadCellSensor>(
        &mut self,
        now: Instant,
        interval: Duration,
        calibration: &CalibrationState,
        sensor: &mut L,
        latest: &LatestReading,
    ) -> SampleOutcome {
        let since = match self.state {
            SamplingState::Halted => return SampleOutcome::Halted,
            SamplingState::AwaitingSensor { since } => since,
            SamplingState::WaitingForInterval | SamplingState::DataReady => {
                let due = self
                    .last_event
                    .is_none_or(|last| now.saturating_duration_since(last) >= interval);
                if !due {
                    return SampleOutcome::Idle;
                }
                now
            }
        };

        let raw = match sensor.is_ready() {
            Ok(true) => match sensor.read() {
                Ok(raw) => raw,
                Err(_) => return self.sensor_fault(now),
            },
            Ok(false) => {
                if now.saturating_duration_since(since) >= SENSOR_TIMEOUT {
                    error!(
                        "Load cell not ready for {} ms, sampling halted",
                        SENSOR_TIMEOUT.as_millis()
                    );
                    self.state = SamplingState::Halted;
                    return SampleOutcome::Halted;
                }
                self.state = SamplingState::AwaitingSensor { since };
                return SampleOutcome::AwaitingSensor;
            }
            Err(_) => return self.sensor_fault(now),
        };

        self.state = SamplingState::DataReady;
        self.last_event = Some(now);

        let outcome = match scale(raw, calibration) {
            Some(scaled) => {
                let reading = SampleReading {
                    raw,
                    scaled,
                    timestamp: now,
                };
                trace!("Sample raw {} scaled {}", raw, scaled);
                latest.publish(reading);
                SampleOutcome::Published(reading)
            }
            None => {
                error!(
                    "Calibration endpoints are both {}, sample not scaled",
                    calibration.empty_offset
                );
                latest.mark_stale();
                SampleOutcome::ConfigurationError
            }
        };

        self.state = SamplingState::WaitingForInterval;
        outcome
    }

    fn sensor_fault(&mut self, now: Instant) -> SampleOutcome {
        warn!("Load cell read failed");
        self.state = SamplingState::WaitingForInterval;
        self.last_event = Some(now);
        SampleOutcome::SensorFault
    }
}
