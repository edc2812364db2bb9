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

//! Host side doubles for the hardware boundaries.

use crate::lifecycle::power::{PowerPolicy, WakeCause};
use crate::lifecycle::provisioning::ProvisioningPolicy;
use crate::storage::{KeyValueStore, StorageError, StoredKey, StoredValue};
use crate::weight::LoadCellSensor;
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use embedded_storage_async::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};
use std::collections::{BTreeMap, VecDeque};

#[derive(Default)]
pub struct MemoryStore {
    values: BTreeMap<u16, StoredValue>,
    writes: usize,
    pub fail_writes: bool,
    pub fail_reads: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a value without counting it as a write.
    pub fn insert(&mut self, key: StoredKey, value: StoredValue) {
        self.values.insert(key.id(), value);
    }

    pub fn value(&self, key: StoredKey) -> Option<&StoredValue> {
        self.values.get(&key.id())
    }

    pub fn long(&self, key: StoredKey) -> Option<i64> {
        self.value(key).and_then(StoredValue::as_long)
    }

    pub fn int(&self, key: StoredKey) -> Option<i32> {
        self.value(key).and_then(StoredValue::as_int)
    }

    pub fn bool(&self, key: StoredKey) -> Option<bool> {
        self.value(key).and_then(StoredValue::as_bool)
    }

    pub fn text(&self, key: StoredKey) -> Option<&str> {
        self.value(key).and_then(StoredValue::as_text)
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    async fn fetch(&mut self, key: StoredKey) -> Result<Option<StoredValue>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::RetrieveError);
        }
        Ok(self.values.get(&key.id()).cloned())
    }

    async fn store(&mut self, key: StoredKey, value: &StoredValue) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::SaveError);
        }
        self.values.insert(key.id(), value.clone());
        self.writes += 1;
        Ok(())
    }

    async fn erase_all(&mut self) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::SaveError);
        }
        self.values.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFault;

/// Hands out queued raw values, repeating the last one once the queue runs dry.
#[derive(Default)]
pub struct ScriptedSensor {
    pub ready: bool,
    values: VecDeque<i64>,
    last: i64,
    pub fail_reads: bool,
    pub reads: usize,
    pub powered_down: bool,
}

impl ScriptedSensor {
    pub fn with_values(values: &[i64]) -> Self {
        Self {
            ready: true,
            values: values.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn never_ready() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: i64) {
        self.values.push_back(value);
    }
}

impl LoadCellSensor for ScriptedSensor {
    type Error = SensorFault;

    fn is_ready(&mut self) -> Result<bool, SensorFault> {
        Ok(self.ready && !self.powered_down)
    }

    fn read(&mut self) -> Result<i64, SensorFault> {
        if self.fail_reads {
            return Err(SensorFault);
        }
        self.reads += 1;
        if let Some(value) = self.values.pop_front() {
            self.last = value;
        }
        Ok(self.last)
    }

    fn power_down(&mut self) -> Result<(), SensorFault> {
        self.powered_down = true;
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), SensorFault> {
        self.powered_down = false;
        Ok(())
    }
}

/// Returns immediately, keeping a tally of the time asked for.
#[derive(Default)]
pub struct CountingDelay {
    total_ns: u64,
}

impl CountingDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl DelayNs for CountingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

pub struct RecordingPower {
    pub enabled: bool,
    pub sleeps: Vec<Duration>,
    pub cause: WakeCause,
}

impl RecordingPower {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            sleeps: Vec::new(),
            cause: WakeCause::NotFromSleep,
        }
    }
}

impl PowerPolicy for RecordingPower {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn enter_sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
        self.cause = WakeCause::Timer;
    }

    fn wake_cause(&mut self) -> WakeCause {
        self.cause
    }
}

#[derive(Default)]
pub struct RecordingProvisioning {
    pub entered_as: Vec<String>,
}

impl ProvisioningPolicy for RecordingProvisioning {
    async fn enter_configuration_mode(&mut self, hostname: &str) {
        self.entered_as.push(hostname.to_string());
    }
}

/// NOR flash in RAM. Writes can only clear bits, erase sets a whole page back to 0xff.
pub struct RamFlash {
    data: Vec<u8>,
}

impl RamFlash {
    pub const PAGE_SIZE: usize = 4096;
    pub const CAPACITY: usize = 4 * Self::PAGE_SIZE;

    pub fn new() -> Self {
        Self {
            data: vec![0xff; Self::CAPACITY],
        }
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, NorFlashErrorKind> {
        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = Self::PAGE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let range = self.range(from, (to - from) as usize)?;
        self.data[range].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let range = self.range(offset, bytes.len())?;
        for (cell, byte) in self.data[range].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}
