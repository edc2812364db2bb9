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

//! Sleep by idling on a timer or the wake pin, then resetting. The wake cause survives the reset
//! in a watchdog scratch register.

use coopfeeder_core::lifecycle::power::{PowerPolicy, WakeCause};
use defmt::info;
use embassy_futures::select::{Either, select};
use embassy_rp::gpio::Input;
use embassy_rp::watchdog::Watchdog;
use embassy_time::{Duration, Timer};

const CAUSE_SCRATCH: usize = 0;
const CAUSE_TIMER: u32 = 0xC00F_0001;
const CAUSE_WAKE_PIN: u32 = 0xC00F_0002;

pub struct WatchdogSleep {
    watchdog: Watchdog,
    wake_pin: Input<'static>,
    boot_cause: WakeCause,
}

impl WatchdogSleep {
    /// Reads and clears the cause left by the previous sleep.
    pub fn new(mut watchdog: Watchdog, wake_pin: Input<'static>) -> Self {
        let boot_cause = match watchdog.get_scratch(CAUSE_SCRATCH) {
            CAUSE_TIMER => WakeCause::Timer,
            CAUSE_WAKE_PIN => WakeCause::ExternalSignal,
            _ => WakeCause::NotFromSleep,
        };
        watchdog.set_scratch(CAUSE_SCRATCH, 0);
        Self {
            watchdog,
            wake_pin,
            boot_cause,
        }
    }
}

impl PowerPolicy for WatchdogSleep {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn enter_sleep(&mut self, duration: Duration) {
        let cause = match select(Timer::after(duration), self.wake_pin.wait_for_low()).await {
            Either::First(_) => CAUSE_TIMER,
            Either::Second(_) => CAUSE_WAKE_PIN,
        };
        info!("Waking, resetting");
        self.watchdog.set_scratch(CAUSE_SCRATCH, cause);
        self.watchdog.trigger_reset();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn wake_cause(&mut self) -> WakeCause {
        self.boot_cause
    }
}
