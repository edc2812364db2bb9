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

#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Units {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "%"))]
    Percent,
}

impl Units {
    pub fn symbol(&self) -> &'static str {
        match self {
            Units::Percent => "%",
        }
    }
}

/// Latest fill level pushed to subscribers, `{loadcell, units, lastUpdate}` on the wire.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadingsRecord {
    /// Scaled load, 0 to 100.
    pub loadcell: u8,
    pub units: Units,
    /// Milliseconds since the Unix epoch when the wall clock is anchored, device uptime
    /// otherwise.
    #[cfg_attr(feature = "serde", serde(rename = "lastUpdate"))]
    pub last_update: u64,
}

impl ReadingsRecord {
    pub fn percent(loadcell: u8, last_update: u64) -> Self {
        Self {
            loadcell,
            units: Units::Percent,
            last_update,
        }
    }
}
