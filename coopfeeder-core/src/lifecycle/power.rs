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

//! Awake budget and sleep admission.
//!
//! The controller decides, the [`PowerPolicy`] acts. A decision to sleep is only committed after
//! a grace period during which presence is re-checked on every tick, so the node never sleeps on
//! a tick where a client is connected.

use core::future::Future;
use embassy_time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCause {
    Timer,
    /// Wake pin or other external event
    ExternalSignal,
    NotFromSleep,
}

pub trait PowerPolicy {
    /// A disabled policy turns the controller into a no-op.
    fn is_enabled(&self) -> bool;

    /// Enter low power for `duration`. Platforms that resume by rebooting never return.
    fn enter_sleep(&mut self, duration: Duration) -> impl Future<Output = ()>;

    /// Why the last resume or boot happened. Diagnostic only.
    fn wake_cause(&mut self) -> WakeCause;
}

/// Mains powered nodes never sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOn;

impl PowerPolicy for AlwaysOn {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn enter_sleep(&mut self, _duration: Duration) {}

    fn wake_cause(&mut self) -> WakeCause {
        WakeCause::NotFromSleep
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerConfig {
    pub awake_budget: Duration,
    pub sleep_duration: Duration,
    pub grace_period: Duration,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            awake_budget: Duration::from_secs(60),
            sleep_duration: Duration::from_secs(300),
            grace_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepState {
    Awake { since: Instant },
    PendingSleepCheck { until: Instant },
    Asleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDecision {
    Disabled,
    Stay,
    /// Budget ran out with clients connected, a fresh budget started.
    Extended,
    /// Budget ran out with no clients. Flush state now, sleep after the grace period.
    PrepareForSleep,
    /// A client showed up during the grace period.
    SleepAborted,
    /// Grace period over with no clients. Hand off to the platform now.
    SleepNow,
    /// Sleep was due but state could not be saved, a fresh budget started.
    SleepDeferred,
}

pub struct SleepWakeController {
    config: PowerConfig,
    state: SleepState,
}

impl SleepWakeController {
    pub fn new(config: PowerConfig, now: Instant) -> Self {
        Self {
            config,
            state: SleepState::Awake { since: now },
        }
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn is_asleep(&self) -> bool {
        self.state == SleepState::Asleep
    }

    pub fn evaluate(&mut self, now: Instant, enabled: bool, has_clients: bool) -> PowerDecision {
        if !enabled {
            return PowerDecision::Disabled;
        }

        match self.state {
            SleepState::Awake { since } => {
                if now.saturating_duration_since(since) < self.config.awake_budget {
                    return PowerDecision::Stay;
                }
                if has_clients {
                    info!("Awake budget used but clients connected, staying awake");
                    self.state = SleepState::Awake { since: now };
                    PowerDecision::Extended
                } else {
                    info!(
                        "Awake budget used, sleeping in {} ms",
                        self.config.grace_period.as_millis()
                    );
                    self.state = SleepState::PendingSleepCheck {
                        until: now + self.config.grace_period,
                    };
                    PowerDecision::PrepareForSleep
                }
            }
            SleepState::PendingSleepCheck { until } => {
                if has_clients {
                    info!("Client connected during sleep grace period, staying awake");
                    self.state = SleepState::Awake { since: now };
                    PowerDecision::SleepAborted
                } else if now >= until {
                    PowerDecision::SleepNow
                } else {
                    PowerDecision::Stay
                }
            }
            SleepState::Asleep => PowerDecision::Stay,
        }
    }

    /// Records that the platform is about to sleep.
    pub fn mark_asleep(&mut self) {
        info!(
            "Sleeping for {} s",
            self.config.sleep_duration.as_secs()
        );
        self.state = SleepState::Asleep;
    }

    /// Stays awake for another budget instead of sleeping with unsaved state.
    pub fn defer(&mut self, now: Instant) {
        error!("Unsaved settings, sleep deferred");
        self.state = SleepState::Awake { since: now };
    }

    /// Starts a fresh awake budget after waking in place.
    pub fn resume(&mut self, now: Instant, cause: WakeCause) {
        info!("Resumed from sleep: {:?}", cause);
        self.state = SleepState::Awake { since: now };
    }
}
