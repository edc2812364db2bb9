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

//! Line oriented maintenance console. One whitespace separated command per line.

use crate::application::device::Device;
use crate::config::ConfigError;
use crate::lifecycle::power::PowerPolicy;
use crate::lifecycle::provisioning::ProvisioningPolicy;
use crate::storage::KeyValueStore;
use crate::weight::LoadCellSensor;
use crate::weight::calibration::{CalibrationError, CalibrationRole};
use coopfeeder_messages::ReadingsRecord;
use core::fmt::Write;
use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;

/// Longest readings record is `{"loadcell":100,"units":"%","lastUpdate":18446744073709551615}`.
#[cfg(feature = "serde")]
const READINGS_JSON_CAPACITY: usize = 64;

const HELP: &[&str] = &[
    "?, help              this list",
    "status               uptime, raw reading and calibration",
    "timer [seconds]      show or set the sampling interval",
    "tare empty|full      capture a calibration point",
    "empty|full           same as tare",
    "empty|full <raw>     override a calibration point",
    "empty|full ?         show a calibration point",
    "hostname [name]      show or set the hostname, applied on restart",
    "wifi [on|off]        show or set provisioning on double reset",
    "clock [epoch-ms]     show or set the wall clock",
    "readings             latest reading record",
    "clients              connected client counts",
    "note <text>          write a note to the log",
    "format               erase all saved settings",
    "restart              restart the device",
];

/// A value the console can show, used to report the current value back after bad input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Setting {
    Timer,
    Offset(CalibrationRole),
    Hostname,
    Wifi,
    Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    Help,
    Status,
    Show(Setting),
    SetTimer(u32),
    Tare(CalibrationRole),
    SetOffset(CalibrationRole, i64),
    SetHostname(&'a str),
    SetWifi(bool),
    Clock(u64),
    Readings,
    Clients,
    Note(&'a str),
    Format,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleError<'a> {
    Empty,
    UnknownCommand(&'a str),
    InvalidArgument(Setting),
    Usage(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsoleFlow {
    Continue,
    /// The caller should reset the device.
    Restart,
}

pub fn parse(line: &str) -> Result<ConsoleCommand<'_>, ConsoleError<'_>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "" => return Err(ConsoleError::Empty),
        "?" | "help" => ConsoleCommand::Help,
        "status" => ConsoleCommand::Status,
        "timer" if rest.is_empty() => ConsoleCommand::Show(Setting::Timer),
        "timer" => rest
            .parse()
            .map(ConsoleCommand::SetTimer)
            .map_err(|_| ConsoleError::InvalidArgument(Setting::Timer))?,
        "tare" => match rest {
            "empty" => ConsoleCommand::Tare(CalibrationRole::Empty),
            "full" => ConsoleCommand::Tare(CalibrationRole::Full),
            _ => return Err(ConsoleError::Usage("tare empty|full")),
        },
        "empty" | "full" => {
            let role = if word == "empty" {
                CalibrationRole::Empty
            } else {
                CalibrationRole::Full
            };
            match rest {
                "" => ConsoleCommand::Tare(role),
                "?" => ConsoleCommand::Show(Setting::Offset(role)),
                value => value
                    .parse()
                    .map(|v| ConsoleCommand::SetOffset(role, v))
                    .map_err(|_| ConsoleError::InvalidArgument(Setting::Offset(role)))?,
            }
        }
        "hostname" if rest.is_empty() => ConsoleCommand::Show(Setting::Hostname),
        "hostname" => ConsoleCommand::SetHostname(rest),
        "wifi" => match rest {
            "" => ConsoleCommand::Show(Setting::Wifi),
            "on" | "1" | "true" => ConsoleCommand::SetWifi(true),
            "off" | "0" | "false" => ConsoleCommand::SetWifi(false),
            _ => return Err(ConsoleError::InvalidArgument(Setting::Wifi)),
        },
        "clock" if rest.is_empty() => ConsoleCommand::Show(Setting::Clock),
        "clock" => rest
            .parse()
            .map(ConsoleCommand::Clock)
            .map_err(|_| ConsoleError::InvalidArgument(Setting::Clock))?,
        "readings" => ConsoleCommand::Readings,
        "clients" => ConsoleCommand::Clients,
        "note" => ConsoleCommand::Note(rest),
        "format" => ConsoleCommand::Format,
        "restart" => ConsoleCommand::Restart,
        other => return Err(ConsoleError::UnknownCommand(other)),
    };
    Ok(command)
}

/// Parses and runs one console line, writing the response to `out`.
pub async fn handle_line<S, L, P, V, D, W>(
    device: &mut Device<'_, S, L, P, V>,
    line: &str,
    delay: &mut D,
    now: Instant,
    out: &mut W,
) -> Result<ConsoleFlow, core::fmt::Error>
where
    S: KeyValueStore,
    L: LoadCellSensor,
    P: PowerPolicy,
    V: ProvisioningPolicy,
    D: DelayNs,
    W: Write,
{
    match parse(line) {
        Ok(command) => execute(device, command, delay, now, out).await,
        Err(ConsoleError::Empty) => Ok(ConsoleFlow::Continue),
        Err(ConsoleError::UnknownCommand(word)) => {
            writeln!(out, "unknown command '{}', ? for help", word)?;
            Ok(ConsoleFlow::Continue)
        }
        Err(ConsoleError::InvalidArgument(setting)) => {
            writeln!(out, "invalid value, unchanged")?;
            show(device, setting, now, out)?;
            Ok(ConsoleFlow::Continue)
        }
        Err(ConsoleError::Usage(usage)) => {
            writeln!(out, "usage: {}", usage)?;
            Ok(ConsoleFlow::Continue)
        }
    }
}

pub async fn execute<S, L, P, V, D, W>(
    device: &mut Device<'_, S, L, P, V>,
    command: ConsoleCommand<'_>,
    delay: &mut D,
    now: Instant,
    out: &mut W,
) -> Result<ConsoleFlow, core::fmt::Error>
where
    S: KeyValueStore,
    L: LoadCellSensor,
    P: PowerPolicy,
    V: ProvisioningPolicy,
    D: DelayNs,
    W: Write,
{
    match command {
        ConsoleCommand::Help => {
            for line in HELP {
                writeln!(out, "{}", line)?;
            }
        }
        ConsoleCommand::Status => {
            let status = device.get_status(now);
            write!(out, "uptime {} s, raw ", status.uptime_s)?;
            match status.raw {
                Some(raw) => write!(out, "{}", raw)?,
                None => write!(out, "not ready")?,
            }
            writeln!(
                out,
                ", empty {}, full {}",
                status.empty_offset, status.full_offset
            )?;
            if device.is_sampling_halted() {
                writeln!(out, "sampling halted, sensor not responding")?;
            }
        }
        ConsoleCommand::Show(setting) => show(device, setting, now, out)?,
        ConsoleCommand::SetTimer(seconds) => match device.set_interval_seconds(seconds).await {
            Ok(ms) => writeln!(out, "timer {} ms", ms)?,
            Err(_) => writeln!(out, "timer {} ms, not saved", device.interval_ms())?,
        },
        ConsoleCommand::Tare(role) => match device.tare(role, delay).await {
            Ok(value) => writeln!(out, "{} {}", role.name(), value)?,
            Err(CalibrationError::Storage(_)) => writeln!(
                out,
                "{} {}, not saved",
                role.name(),
                device.calibration().get(role)
            )?,
            Err(CalibrationError::SensorTimeout) => {
                writeln!(out, "sensor not ready, unchanged")?;
                show(device, Setting::Offset(role), now, out)?;
            }
            Err(CalibrationError::Sensor(_)) => {
                writeln!(out, "sensor error, unchanged")?;
                show(device, Setting::Offset(role), now, out)?;
            }
        },
        ConsoleCommand::SetOffset(role, value) => match device.set_offset(role, value).await {
            Ok(()) => writeln!(out, "{} {}", role.name(), value)?,
            Err(_) => writeln!(out, "{} {}, not saved", role.name(), value)?,
        },
        ConsoleCommand::SetHostname(name) => match device.set_hostname(name).await {
            Ok(()) => writeln!(out, "hostname {}, applied on restart", name)?,
            Err(ConfigError::InvalidHostname) => {
                writeln!(out, "invalid hostname, unchanged")?;
                show(device, Setting::Hostname, now, out)?;
            }
            Err(ConfigError::Storage(_)) => {
                writeln!(out, "hostname {}, not saved", name)?;
            }
        },
        ConsoleCommand::SetWifi(enabled) => match device.set_wifi_enabled(enabled).await {
            Ok(()) => show(device, Setting::Wifi, now, out)?,
            Err(_) => writeln!(out, "wifi {}, not saved", on_off(enabled))?,
        },
        ConsoleCommand::Clock(epoch_ms) => {
            device.sync_wall_clock(epoch_ms, now);
            show(device, Setting::Clock, now, out)?;
        }
        ConsoleCommand::Readings => match device.readings_record() {
            Some(record) => write_readings(&record, out)?,
            None => writeln!(out, "no reading yet")?,
        },
        ConsoleCommand::Clients => {
            let counts = device.presence();
            writeln!(out, "stream {}, socket {}", counts.stream, counts.socket)?;
        }
        ConsoleCommand::Note(text) => {
            info!("Note: {}", text);
            writeln!(out, "noted")?;
        }
        ConsoleCommand::Format => match device.format_storage().await {
            Ok(()) => writeln!(out, "storage formatted, defaults apply on restart")?,
            Err(_) => writeln!(out, "unable to format storage")?,
        },
        ConsoleCommand::Restart => {
            let _ = device.flush().await;
            writeln!(out, "restarting")?;
            return Ok(ConsoleFlow::Restart);
        }
    }
    Ok(ConsoleFlow::Continue)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

#[cfg(feature = "serde")]
fn write_readings<W: Write>(record: &ReadingsRecord, out: &mut W) -> core::fmt::Result {
    match serde_json_core::to_string::<_, READINGS_JSON_CAPACITY>(record) {
        Ok(json) => writeln!(out, "{}", json.as_str()),
        Err(_) => {
            warn!("Readings record does not fit {} bytes", READINGS_JSON_CAPACITY);
            writeln!(out, "unable to encode reading")
        }
    }
}

#[cfg(not(feature = "serde"))]
fn write_readings<W: Write>(record: &ReadingsRecord, out: &mut W) -> core::fmt::Result {
    writeln!(
        out,
        "loadcell {} {}, last update {}",
        record.loadcell,
        record.units.symbol(),
        record.last_update
    )
}

fn show<S, L, P, V, W>(
    device: &Device<'_, S, L, P, V>,
    setting: Setting,
    now: Instant,
    out: &mut W,
) -> core::fmt::Result
where
    S: KeyValueStore,
    L: LoadCellSensor,
    P: PowerPolicy,
    V: ProvisioningPolicy,
    W: Write,
{
    match setting {
        Setting::Timer => writeln!(out, "timer {} ms", device.interval_ms()),
        Setting::Offset(role) => {
            writeln!(out, "{} {}", role.name(), device.calibration().get(role))
        }
        Setting::Hostname => writeln!(out, "hostname {}", device.config().hostname.as_str()),
        Setting::Wifi => writeln!(
            out,
            "wifi {}",
            on_off(device.config().wifi_enabled)
        ),
        Setting::Clock => {
            let clock = device.wall_clock();
            if clock.is_anchored() {
                writeln!(out, "clock {}", clock.epoch_ms_at(now))
            } else {
                writeln!(out, "clock not set, uptime {} ms", now.as_millis())
            }
        }
    }
}
