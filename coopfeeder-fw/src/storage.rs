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

use coopfeeder_core::storage::FlashKeyValueStore;
use embassy_embedded_hal::adapter::BlockingAsync;
use embassy_rp::Peri;
use embassy_rp::flash::{Blocking, Flash};
use embassy_rp::peripherals::FLASH;

pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Key/value region at the top of flash, kept out of the image by `memory.x`.
const KEY_VALUE_SIZE: u32 = 32 * 1024;
const KEY_VALUE_START: u32 = FLASH_SIZE as u32 - KEY_VALUE_SIZE;

pub type BlockingFlash = Flash<'static, FLASH, Blocking, FLASH_SIZE>;
pub type FeederStore = FlashKeyValueStore<BlockingAsync<BlockingFlash>>;

pub fn initialise_storage(flash: Peri<'static, FLASH>) -> FeederStore {
    let flash = BlockingFlash::new_blocking(flash);
    FlashKeyValueStore::new(
        BlockingAsync::new(flash),
        KEY_VALUE_START..KEY_VALUE_START + KEY_VALUE_SIZE,
    )
}
