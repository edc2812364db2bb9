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

//! The node's owned state and the single loop step that drives it.

use crate::application::wall_clock::WallClock;
use crate::config::{ConfigError, DeviceConfig};
use crate::lifecycle::drd::{DoubleResetDetector, DrdPoll};
use crate::lifecycle::power::{
    PowerConfig, PowerDecision, PowerPolicy, SleepWakeController, WakeCause,
};
use crate::lifecycle::presence::{ClientPresence, PresenceCounts};
use crate::lifecycle::provisioning::ProvisioningPolicy;
use crate::storage::{KeyValueStore, StorageError};
use crate::weight::LoadCellSensor;
use crate::weight::calibration::{
    CalibrationError, CalibrationRole, CalibrationState, CalibrationStore,
};
use crate::weight::sampling::{LatestReading, SampleOutcome, SamplingConfig, SamplingEngine};
use coopfeeder_messages::{ReadingsRecord, StatusReport};
use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceMode {
    Running,
    /// A tare is running, sampling is suspended.
    Maintenance,
}

/// Hardware and shared state handed to [`Device::boot`].
pub struct DeviceParts<'a, S, L, P, V> {
    pub store: S,
    pub sensor: L,
    pub power: P,
    pub provisioning: V,
    pub power_config: PowerConfig,
    pub presence: &'a ClientPresence,
    pub latest: &'a LatestReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    pub double_reset: bool,
    pub configuration_mode: bool,
    pub wake_cause: WakeCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReport {
    pub sample: SampleOutcome,
    pub drd: DrdPoll,
    pub power: PowerDecision,
    /// Set on the first tick after an in-place resume.
    pub woke: Option<WakeCause>,
}

pub struct Device<'a, S, L, P, V> {
    store: S,
    sensor: L,
    power: P,
    provisioning: V,
    calibration: CalibrationStore,
    sampling_config: SamplingConfig,
    sampler: SamplingEngine,
    drd: DoubleResetDetector,
    sleep: SleepWakeController,
    presence: &'a ClientPresence,
    latest: &'a LatestReading,
    config: DeviceConfig,
    clock: WallClock,
    mode: DeviceMode,
    resume_pending: bool,
}

impl<'a, S, L, P, V> Device<'a, S, L, P, V>
where
    S: KeyValueStore,
    L: LoadCellSensor,
    P: PowerPolicy,
    V: ProvisioningPolicy,
{
    /// Loads persisted state, evaluates the double reset window and enters configuration mode
    /// when asked to.
    pub async fn boot(parts: DeviceParts<'a, S, L, P, V>, now: Instant) -> (Self, BootReport) {
        let DeviceParts {
            mut store,
            sensor,
            mut power,
            mut provisioning,
            power_config,
            presence,
            latest,
        } = parts;

        let config = DeviceConfig::load(&mut store).await;
        let calibration = CalibrationStore::load(&mut store).await;
        let sampling_config = SamplingConfig::load(&mut store).await;

        let mut drd = DoubleResetDetector::new();
        let double_reset = drd.evaluate(&mut store).await;

        let wake_cause = power.wake_cause();
        if power.is_enabled() {
            info!("Wake cause: {:?}", wake_cause);
        }

        let configuration_mode = double_reset && config.wifi_enabled;
        if configuration_mode {
            provisioning
                .enter_configuration_mode(config.hostname.as_str())
                .await;
        } else if double_reset {
            info!("Double reset ignored, wifi disabled");
        }

        let device = Self {
            store,
            sensor,
            power,
            provisioning,
            calibration,
            sampling_config,
            sampler: SamplingEngine::new(),
            drd,
            sleep: SleepWakeController::new(power_config, now),
            presence,
            latest,
            config,
            clock: WallClock::new(),
            mode: DeviceMode::Running,
            resume_pending: false,
        };

        (
            device,
            BootReport {
                double_reset,
                configuration_mode,
                wake_cause,
            },
        )
    }

    /// One pass of the main loop: sample if due, close the double reset window, decide on
    /// sleep. Only blocks for the platform sleep itself.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let woke = if self.resume_pending {
            self.resume_pending = false;
            let cause = self.power.wake_cause();
            if self.sensor.power_up().is_err() {
                warn!("Unable to power up load cell after sleep");
            }
            self.sleep.resume(now, cause);
            Some(cause)
        } else {
            None
        };

        let sample = match self.mode {
            DeviceMode::Maintenance => SampleOutcome::Skipped,
            DeviceMode::Running => self.sampler.tick(
                now,
                self.sampling_config.interval(),
                &self.calibration.state(),
                &mut self.sensor,
                self.latest,
            ),
        };

        let drd = self.drd.poll(&mut self.store, now).await;

        let mut power = self.sleep.evaluate(
            now,
            self.power.is_enabled(),
            self.presence.has_any_clients(),
        );
        match power {
            PowerDecision::PrepareForSleep => {
                let _ = self.flush().await;
            }
            PowerDecision::SleepNow => {
                // sleep may end in a reset, never go down holding unsaved values
                if self.flush().await.is_err() || self.has_pending_writes() {
                    self.sleep.defer(now);
                    power = PowerDecision::SleepDeferred;
                } else {
                    self.sleep_now().await;
                }
            }
            _ => {}
        }

        TickReport {
            sample,
            drd,
            power,
            woke,
        }
    }

    async fn sleep_now(&mut self) {
        if self.sensor.power_down().is_err() {
            warn!("Unable to power down load cell");
        }
        self.sleep.mark_asleep();
        let duration = self.sleep.config().sleep_duration;
        self.power.enter_sleep(duration).await;
        self.resume_pending = true;
    }

    /// Retries every write that failed earlier.
    pub async fn flush(&mut self) -> Result<(), StorageError> {
        let calibration = self.calibration.flush(&mut self.store).await;
        let sampling = self.sampling_config.flush(&mut self.store).await;
        let config = self.config.flush(&mut self.store).await;
        calibration.and(sampling).and(config)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.calibration.has_pending_writes()
            || self.sampling_config.has_pending_write()
            || self.config.has_pending_writes()
    }

    /// Wipes persisted settings. The values in use stay until restart, when defaults load.
    pub async fn format_storage(&mut self) -> Result<(), StorageError> {
        self.store.erase_all().await?;
        self.calibration.discard_pending();
        self.sampling_config.discard_pending();
        self.config.discard_pending();
        warn!("Persisted settings erased");
        Ok(())
    }

    async fn retry_pending(&mut self) {
        if self.has_pending_writes() {
            let _ = self.flush().await;
        }
    }

    /// Captures a calibration endpoint. Sampling is suspended while it runs.
    pub async fn tare<D: DelayNs>(
        &mut self,
        role: CalibrationRole,
        delay: &mut D,
    ) -> Result<i64, CalibrationError<L::Error>> {
        self.retry_pending().await;
        self.mode = DeviceMode::Maintenance;
        info!("Tare {} started", role.name());
        let result = self
            .calibration
            .tare(&mut self.store, &mut self.sensor, delay, role)
            .await;
        self.mode = DeviceMode::Running;
        result
    }

    pub async fn set_offset(
        &mut self,
        role: CalibrationRole,
        value: i64,
    ) -> Result<(), StorageError> {
        self.retry_pending().await;
        self.calibration.set(&mut self.store, role, value).await
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibration.state()
    }

    /// Applies `seconds` as the sampling interval, clamped to the allowed range. Returns the
    /// applied interval in milliseconds.
    pub async fn set_interval_seconds(&mut self, seconds: u32) -> Result<u32, StorageError> {
        self.retry_pending().await;
        self.sampling_config
            .set_interval_ms(&mut self.store, seconds.saturating_mul(1000))
            .await
    }

    pub fn interval_ms(&self) -> u32 {
        self.sampling_config.interval_ms()
    }

    pub async fn set_hostname(&mut self, hostname: &str) -> Result<(), ConfigError> {
        self.retry_pending().await;
        self.config.set_hostname(&mut self.store, hostname).await
    }

    pub async fn set_wifi_enabled(&mut self, enabled: bool) -> Result<(), ConfigError> {
        self.retry_pending().await;
        self.config.set_wifi_enabled(&mut self.store, enabled).await
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn sync_wall_clock(&mut self, epoch_ms: u64, now: Instant) {
        self.clock.anchor(epoch_ms, now);
    }

    pub fn wall_clock(&self) -> &WallClock {
        &self.clock
    }

    pub fn get_status(&mut self, now: Instant) -> StatusReport {
        let calibration = self.calibration.state();
        StatusReport {
            uptime_s: now.as_secs(),
            raw: self.current_raw(),
            empty_offset: calibration.empty_offset,
            full_offset: calibration.full_offset,
        }
    }

    fn current_raw(&mut self) -> Option<i64> {
        match self.sensor.is_ready() {
            Ok(true) => self.sensor.read().ok(),
            _ => None,
        }
    }

    /// Latest reading in its wire form, `None` until the first sample.
    pub fn readings_record(&self) -> Option<ReadingsRecord> {
        self.latest.get().map(|published| {
            ReadingsRecord::percent(
                published.reading.scaled,
                self.clock.epoch_ms_at(published.reading.timestamp),
            )
        })
    }

    pub fn presence(&self) -> PresenceCounts {
        self.presence.counts()
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn is_sampling_halted(&self) -> bool {
        self.sampler.is_halted()
    }

    pub fn is_asleep(&self) -> bool {
        self.sleep.is_asleep()
    }

    pub fn provisioning(&mut self) -> &mut V {
        &mut self.provisioning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::power::AlwaysOn;
    use crate::lifecycle::presence::ClientKind;
    use crate::storage::{StoredKey, StoredValue};
    use crate::test_support::{
        CountingDelay, MemoryStore, RecordingPower, RecordingProvisioning, ScriptedSensor,
    };
    use embassy_futures::block_on;
    use embassy_time::Duration;

    type TestDevice<'a, P> = Device<'a, MemoryStore, ScriptedSensor, P, RecordingProvisioning>;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn feeder_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert(StoredKey::EmptyOffset, StoredValue::Long(1000));
        store.insert(StoredKey::FullRaw, StoredValue::Long(-419_000));
        store
    }

    fn boot<'a, P: PowerPolicy>(
        store: MemoryStore,
        sensor: ScriptedSensor,
        power: P,
        presence: &'a ClientPresence,
        latest: &'a LatestReading,
    ) -> (TestDevice<'a, P>, BootReport) {
        block_on(Device::boot(
            DeviceParts {
                store,
                sensor,
                power,
                provisioning: RecordingProvisioning::default(),
                power_config: PowerConfig {
                    awake_budget: Duration::from_secs(60),
                    sleep_duration: Duration::from_secs(300),
                    grace_period: Duration::from_secs(5),
                },
                presence,
                latest,
            },
            at(0),
        ))
    }

    #[test]
    fn double_reset_enters_configuration_mode_when_wifi_enabled() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let mut store = feeder_store();
        store.insert(StoredKey::DoubleResetFlag, StoredValue::Bool(true));

        let (mut device, report) =
            boot(store, ScriptedSensor::never_ready(), AlwaysOn, &presence, &latest);

        assert!(report.double_reset);
        assert!(report.configuration_mode);
        assert_eq!(report.wake_cause, WakeCause::NotFromSleep);
        assert_eq!(device.provisioning().entered_as, ["coopfeeder"]);
    }

    #[test]
    fn double_reset_is_ignored_with_wifi_disabled() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let mut store = feeder_store();
        store.insert(StoredKey::DoubleResetFlag, StoredValue::Bool(true));
        store.insert(StoredKey::WifiEnabled, StoredValue::Bool(false));

        let (mut device, report) =
            boot(store, ScriptedSensor::never_ready(), AlwaysOn, &presence, &latest);

        assert!(report.double_reset);
        assert!(!report.configuration_mode);
        assert!(device.provisioning().entered_as.is_empty());
    }

    #[test]
    fn ticks_publish_readings_and_close_drd_window() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let sensor = ScriptedSensor::with_values(&[-209_000]);
        let (mut device, _) = boot(feeder_store(), sensor, AlwaysOn, &presence, &latest);

        let report = block_on(device.tick(at(0)));
        assert!(matches!(report.sample, SampleOutcome::Published(_)));
        assert_eq!(report.power, PowerDecision::Disabled);
        assert_eq!(
            device.readings_record(),
            Some(ReadingsRecord::percent(50, 0))
        );

        let mut cleared = 0;
        for ms in (250..=12_000).step_by(250) {
            if block_on(device.tick(at(ms))).drd == DrdPoll::Cleared {
                cleared += 1;
            }
        }
        assert_eq!(cleared, 1);
    }

    #[test]
    fn readings_use_wall_clock_once_anchored() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let sensor = ScriptedSensor::with_values(&[1000]);
        let (mut device, _) = boot(feeder_store(), sensor, AlwaysOn, &presence, &latest);

        device.sync_wall_clock(1_700_000_000_000, at(500));
        block_on(device.tick(at(2000)));

        assert_eq!(
            device.readings_record(),
            Some(ReadingsRecord::percent(0, 1_700_000_001_500))
        );
    }

    #[test]
    fn tare_runs_in_maintenance_and_sampling_resumes() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let sensor = ScriptedSensor::with_values(&[2000, -418_000]);
        let (mut device, _) = boot(feeder_store(), sensor, AlwaysOn, &presence, &latest);
        let mut delay = CountingDelay::default();

        let value = block_on(device.tare(CalibrationRole::Empty, &mut delay));

        assert_eq!(value, Ok(2000));
        assert_eq!(device.mode(), DeviceMode::Running);
        assert_eq!(device.calibration().empty_offset, 2000);
        assert!(matches!(
            block_on(device.tick(at(0))).sample,
            SampleOutcome::Published(_)
        ));
    }

    #[test]
    fn status_reports_uptime_raw_and_offsets() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let sensor = ScriptedSensor::with_values(&[-5]);
        let (mut device, _) = boot(feeder_store(), sensor, AlwaysOn, &presence, &latest);

        assert_eq!(
            device.get_status(at(3_661_000)),
            StatusReport {
                uptime_s: 3661,
                raw: Some(-5),
                empty_offset: 1000,
                full_offset: -419_000,
            }
        );
    }

    #[test]
    fn status_without_conversion_has_no_raw() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            AlwaysOn,
            &presence,
            &latest,
        );
        assert_eq!(device.get_status(at(0)).raw, None);
    }

    #[test]
    fn interval_in_seconds_is_clamped() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            AlwaysOn,
            &presence,
            &latest,
        );

        assert_eq!(block_on(device.set_interval_seconds(50)), Ok(10_000));
        assert_eq!(block_on(device.set_interval_seconds(2)), Ok(2000));
        assert_eq!(device.interval_ms(), 2000);
    }

    #[test]
    fn sleeps_after_budget_and_grace_with_no_clients() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let sensor = ScriptedSensor::with_values(&[1000]);
        let (mut device, _) = boot(
            feeder_store(),
            sensor,
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        assert_eq!(block_on(device.tick(at(60_000))).power, PowerDecision::PrepareForSleep);
        assert_eq!(block_on(device.tick(at(65_000))).power, PowerDecision::SleepNow);
        assert!(device.is_asleep());
        assert!(device.sensor.powered_down);
        assert_eq!(device.power.sleeps, [Duration::from_secs(300)]);

        let report = block_on(device.tick(at(365_000)));
        assert_eq!(report.woke, Some(WakeCause::Timer));
        assert!(!device.is_asleep());
        assert!(!device.sensor.powered_down);
    }

    #[test]
    fn pending_writes_are_flushed_before_sleep() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        device.store.fail_writes = true;
        assert!(block_on(device.set_offset(CalibrationRole::Empty, 1500)).is_err());
        assert!(device.has_pending_writes());

        device.store.fail_writes = false;
        block_on(device.tick(at(60_000)));
        assert!(!device.has_pending_writes());
        assert_eq!(device.store.long(StoredKey::EmptyOffset), Some(1500));
    }

    #[test]
    fn unsaved_calibration_defers_sleep() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        device.store.fail_writes = true;
        assert!(block_on(device.set_offset(CalibrationRole::Empty, 1500)).is_err());
        assert_eq!(block_on(device.tick(at(60_000))).power, PowerDecision::PrepareForSleep);
        assert_eq!(block_on(device.tick(at(65_000))).power, PowerDecision::SleepDeferred);
        assert!(!device.is_asleep());
        assert!(device.power.sleeps.is_empty());
        assert!(device.has_pending_writes());
        assert_eq!(device.calibration().empty_offset, 1500);

        device.store.fail_writes = false;
        assert_eq!(block_on(device.tick(at(125_000))).power, PowerDecision::PrepareForSleep);
        assert_eq!(device.store.long(StoredKey::EmptyOffset), Some(1500));
        assert_eq!(block_on(device.tick(at(130_000))).power, PowerDecision::SleepNow);
        assert_eq!(device.power.sleeps, [Duration::from_secs(300)]);
    }

    #[test]
    fn unsaved_hostname_is_retried_before_sleep() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        device.store.fail_writes = true;
        assert!(block_on(device.set_hostname("henhouse")).is_err());
        assert_eq!(device.config().hostname.as_str(), "henhouse");

        device.store.fail_writes = false;
        block_on(device.tick(at(60_000)));
        assert!(!device.has_pending_writes());
        assert_eq!(device.store.text(StoredKey::Hostname), Some("henhouse"));
    }

    #[test]
    fn format_erases_persisted_settings_but_keeps_values_in_use() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            AlwaysOn,
            &presence,
            &latest,
        );
        assert_eq!(block_on(device.set_interval_seconds(5)), Ok(5000));

        assert_eq!(block_on(device.format_storage()), Ok(()));

        assert_eq!(device.store.value(StoredKey::EmptyOffset), None);
        assert_eq!(device.store.value(StoredKey::TimerDelay), None);
        assert_eq!(device.store.value(StoredKey::DoubleResetFlag), None);
        assert_eq!(device.calibration().empty_offset, 1000);
        assert_eq!(device.interval_ms(), 5000);
    }

    #[test]
    fn never_sleeps_while_a_client_is_connected() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        presence.on_connect(ClientKind::Socket);
        for ms in (0..900_000).step_by(1000) {
            let report = block_on(device.tick(at(ms)));
            assert_ne!(report.power, PowerDecision::SleepNow);
        }
        assert!(device.power.sleeps.is_empty());
    }

    #[test]
    fn client_arriving_in_grace_cancels_sleep() {
        let presence = ClientPresence::new();
        let latest = LatestReading::new();
        let (mut device, _) = boot(
            feeder_store(),
            ScriptedSensor::never_ready(),
            RecordingPower::enabled(),
            &presence,
            &latest,
        );

        block_on(device.tick(at(60_000)));
        presence.on_connect(ClientKind::Stream);
        assert_eq!(block_on(device.tick(at(63_000))).power, PowerDecision::SleepAborted);
        presence.on_disconnect(ClientKind::Stream);
        assert_eq!(block_on(device.tick(at(65_000))).power, PowerDecision::Stay);
        assert!(device.power.sleeps.is_empty());
    }
}
