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

use coopfeeder_core::weight::LoadCellSensor;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Hx711Gain {
    Gain128,
    Gain64,
    Gain32ChannelB,
}

impl Hx711Gain {
    /// Clock pulses per conversion, 24 data bits plus the pulses selecting the next gain.
    fn tick_count(self) -> u32 {
        match self {
            Hx711Gain::Gain128 => 25,
            Hx711Gain::Gain64 => 27,
            Hx711Gain::Gain32ChannelB => 26,
        }
    }
}

const POWER_MODE_CHANGE_DELAY_US: u32 = 60;
const CLK_HALF_PERIOD_US: u32 = 1;
const VALID_DATA_BITS: u32 = 24;

#[derive(Debug)]
pub enum Error<OutPinE, InPinE> {
    OutPin(OutPinE),
    InPin(InPinE),
}

/// Bit banged HX711. DOUT low means a conversion is waiting.
pub struct Hx711<CLK, DATA, D> {
    clock_pin: CLK,
    data_pin: DATA,
    delay: D,
    gain_clocks: u32,
    powered_up: bool,
}

impl<CLK, DATA, D> Hx711<CLK, DATA, D>
where
    CLK: OutputPin,
    DATA: InputPin,
    D: DelayNs,
{
    pub fn new(clock_pin: CLK, data_pin: DATA, delay: D, gain: Hx711Gain) -> Self {
        Self {
            clock_pin,
            data_pin,
            delay,
            gain_clocks: gain.tick_count(),
            powered_up: false,
        }
    }

    fn clock_in(&mut self) -> Result<u32, Error<CLK::Error, DATA::Error>> {
        let mut data: u32 = 0;
        for _ in 0..self.gain_clocks {
            data <<= 1;
            self.clock_pin.set_high().map_err(Error::OutPin)?;
            self.delay.delay_us(CLK_HALF_PERIOD_US);
            self.clock_pin.set_low().map_err(Error::OutPin)?;
            if self.data_pin.is_high().map_err(Error::InPin)? {
                data |= 0x1;
            }
            self.delay.delay_us(CLK_HALF_PERIOD_US);
        }
        Ok(data)
    }
}

/// Drops the gain select pulses and sign extends the 24 bit two's complement result.
fn decode_conversion(data: u32, gain_clocks: u32) -> i64 {
    let data = (data >> (gain_clocks - VALID_DATA_BITS)) & ((1 << VALID_DATA_BITS) - 1);
    i64::from(((data << 8) as i32) >> 8)
}

impl<CLK, DATA, D> LoadCellSensor for Hx711<CLK, DATA, D>
where
    CLK: OutputPin,
    DATA: InputPin,
    D: DelayNs,
{
    type Error = Error<CLK::Error, DATA::Error>;

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        if !self.powered_up {
            self.power_up()?;
        }
        self.data_pin.is_low().map_err(Error::InPin)
    }

    fn read(&mut self) -> Result<i64, Self::Error> {
        // CLK held high for over 60 us powers the chip down mid conversion
        let data = critical_section::with(|_| self.clock_in())?;
        Ok(decode_conversion(data, self.gain_clocks))
    }

    fn power_down(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_high().map_err(Error::OutPin)?;
        self.delay.delay_us(POWER_MODE_CHANGE_DELAY_US);
        self.powered_up = false;
        Ok(())
    }

    fn power_up(&mut self) -> Result<(), Self::Error> {
        self.clock_pin.set_low().map_err(Error::OutPin)?;
        self.delay.delay_us(POWER_MODE_CHANGE_DELAY_US);
        self.powered_up = true;
        Ok(())
    }
}
