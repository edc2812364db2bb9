#![cfg_attr(not(test), no_std)]
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

//! Sensor acquisition and device lifecycle for the coop feeder load cell node.
//!
//! Everything here is hardware independent. The firmware crate supplies a [`weight::LoadCellSensor`],
//! a [`storage::KeyValueStore`] and a [`lifecycle::power::PowerPolicy`] and drives an
//! [`application::device::Device`] from its main loop.

#[macro_use]
mod fmt;

pub mod application;
pub mod config;
pub mod lifecycle;
pub mod storage;
pub mod weight;

#[cfg(test)]
mod test_support;

pub use coopfeeder_messages as messages;
