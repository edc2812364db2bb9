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

#![no_std]
#![no_main]

mod console;
mod hx711;
#[cfg(feature = "deep-sleep")]
mod power;
mod storage;

use assign_resources::assign_resources;
use coopfeeder_core::application::console::{ConsoleFlow, handle_line};
use coopfeeder_core::application::device::{Device, DeviceParts};
use coopfeeder_core::lifecycle::power::PowerConfig;
use coopfeeder_core::lifecycle::presence::ClientPresence;
use coopfeeder_core::lifecycle::provisioning::StaticCredentials;
use coopfeeder_core::weight::sampling::{LatestReading, SampleOutcome};
use defmt::{info, trace, unwrap, warn};
use embassy_executor::Spawner;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
#[allow(unused_imports)]
use {defmt_rtt as _, panic_probe as _};

use crate::console::{CONSOLE_LINES, ConsoleWriter};
use crate::hx711::{Hx711, Hx711Gain};
use crate::storage::{FeederStore, initialise_storage};

pub static PRESENCE: ClientPresence = ClientPresence::new();
static LATEST_READING: LatestReading = LatestReading::new();

const TICK_PERIOD: Duration = Duration::from_millis(50);

assign_resources! {
    strain_gauge_io: StrainGaugeResources {
        clk_pin: PIN_14,
        data_pin: PIN_15,
    },
    usb: UsbResources {
        usb: USB,
    },
    storage: StorageResources {
        flash: FLASH,
    },
    power: PowerResources {
        watchdog: WATCHDOG,
        wake_pin: PIN_6,
    }
}

type LoadCell = Hx711<Output<'static>, Input<'static>, Delay>;

#[cfg(feature = "deep-sleep")]
type SelectedPower = power::WatchdogSleep;
#[cfg(not(feature = "deep-sleep"))]
type SelectedPower = coopfeeder_core::lifecycle::power::AlwaysOn;

type FeederDevice = Device<'static, FeederStore, LoadCell, SelectedPower, StaticCredentials>;

#[cfg(feature = "deep-sleep")]
fn power_policy(resources: PowerResources) -> SelectedPower {
    let watchdog = embassy_rp::watchdog::Watchdog::new(resources.watchdog);
    let wake_pin = Input::new(resources.wake_pin, Pull::Up);
    power::WatchdogSleep::new(watchdog, wake_pin)
}

#[cfg(not(feature = "deep-sleep"))]
fn power_policy(_resources: PowerResources) -> SelectedPower {
    coopfeeder_core::lifecycle::power::AlwaysOn
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    info!("Coop feeder starting");

    let load_cell = Hx711::new(
        Output::new(r.strain_gauge_io.clk_pin, Level::Low),
        Input::new(r.strain_gauge_io.data_pin, Pull::Up),
        Delay,
        Hx711Gain::Gain128,
    );

    let parts = DeviceParts {
        store: initialise_storage(r.storage.flash),
        sensor: load_cell,
        power: power_policy(r.power),
        provisioning: StaticCredentials,
        power_config: PowerConfig::default(),
        presence: &PRESENCE,
        latest: &LATEST_READING,
    };
    let (device, boot) = Device::boot(parts, Instant::now()).await;
    info!("Boot complete: {}", boot);

    console::start(spawner, r.usb);
    spawner.spawn(unwrap!(device_task(device)));
}

#[embassy_executor::task]
async fn device_task(mut device: FeederDevice) {
    let mut ticker = Ticker::every(TICK_PERIOD);
    let mut delay = Delay;
    let mut out = ConsoleWriter;
    let mut halt_reported = false;

    loop {
        ticker.next().await;

        while let Ok(line) = CONSOLE_LINES.try_receive() {
            let Ok(line) = core::str::from_utf8(&line) else {
                warn!("Console line is not UTF-8");
                continue;
            };
            match handle_line(&mut device, line, &mut delay, Instant::now(), &mut out).await {
                Ok(ConsoleFlow::Continue) => {}
                Ok(ConsoleFlow::Restart) => restart().await,
                Err(_) => warn!("Console output failed"),
            }
        }

        let report = device.tick(Instant::now()).await;
        match report.sample {
            SampleOutcome::Published(reading) => trace!("Fill level {}%", reading.scaled),
            SampleOutcome::Halted if !halt_reported => {
                warn!("Load cell sampling halted until restart");
                halt_reported = true;
            }
            _ => {}
        }
    }
}

async fn restart() -> ! {
    info!("Restart requested");
    Timer::after_millis(100).await;
    cortex_m::peripheral::SCB::sys_reset();
}
