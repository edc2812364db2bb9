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

pub mod calibration;
pub mod sampling;

pub trait LoadCellSensor {
    type Error;

    /// True when a conversion is waiting to be read. Must not block.
    fn is_ready(&mut self) -> Result<bool, Self::Error>;

    /// Reads the pending conversion. Only valid after [`Self::is_ready`] returned true.
    fn read(&mut self) -> Result<i64, Self::Error>;

    /// Put the amplifier into its low power state
    fn power_down(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
