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

use crate::storage::{KeyValueStore, StorageError, StoredKey, StoredValue};
use core::ops::Range;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

/// Scratch space for one serialized item, rounded up to flash word alignment. Must fit the
/// largest [`StoredValue`].
pub const DATA_BUFFER_SIZE: usize = 128;

/// [`KeyValueStore`] over a NOR flash range, one `sequential-storage` map item per key.
pub struct FlashKeyValueStore<F>
where
    F: NorFlash,
{
    flash: F,
    key_value_range: Range<u32>,
    flash_cache: NoCache,
}

impl<F> FlashKeyValueStore<F>
where
    F: NorFlash,
{
    pub fn new(flash: F, key_value_range: Range<u32>) -> Self {
        debug!(
            "Key/value store on flash range 0x{:x} to 0x{:x}",
            key_value_range.start,
            key_value_range.end
        );
        Self {
            flash,
            key_value_range,
            flash_cache: NoCache::new(),
        }
    }
}

impl<F> KeyValueStore for FlashKeyValueStore<F>
where
    F: NorFlash,
{
    async fn fetch(&mut self, key: StoredKey) -> Result<Option<StoredValue>, StorageError> {
        let mut data_buffer = [0; DATA_BUFFER_SIZE];

        map::fetch_item(
            &mut self.flash,
            self.key_value_range.clone(),
            &mut self.flash_cache,
            &mut data_buffer,
            &key.id(),
        )
        .await
        .map_err(|_| {
            warn!("Unable to read {}", key.name());
            StorageError::RetrieveError
        })
    }

    async fn store(&mut self, key: StoredKey, value: &StoredValue) -> Result<(), StorageError> {
        let mut data_buffer = [0; DATA_BUFFER_SIZE];

        map::store_item(
            &mut self.flash,
            self.key_value_range.clone(),
            &mut self.flash_cache,
            &mut data_buffer,
            &key.id(),
            value,
        )
        .await
        .map_err(|_| {
            warn!("Unable to save {}", key.name());
            StorageError::SaveError
        })?;

        trace!("Saved {}", key.name());
        Ok(())
    }

    async fn erase_all(&mut self) -> Result<(), StorageError> {
        sequential_storage::erase_all(&mut self.flash, self.key_value_range.clone())
            .await
            .map_err(|_| {
                warn!("Unable to erase key/value storage");
                StorageError::SaveError
            })?;

        info!("Key/value storage erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RamFlash;
    use embassy_futures::block_on;

    fn new_store() -> FlashKeyValueStore<RamFlash> {
        FlashKeyValueStore::new(RamFlash::new(), 0..RamFlash::CAPACITY as u32)
    }

    #[test]
    fn missing_key_reads_as_none() {
        let mut store = new_store();
        assert_eq!(block_on(store.fetch(StoredKey::TimerDelay)), Ok(None));
    }

    #[test]
    fn latest_write_wins() {
        let mut store = new_store();
        block_on(async {
            store.put_long(StoredKey::EmptyOffset, 1000).await.unwrap();
            store.put_long(StoredKey::EmptyOffset, 1200).await.unwrap();
            store.put_long(StoredKey::FullRaw, -419_000).await.unwrap();

            assert_eq!(store.get_long(StoredKey::EmptyOffset, 0).await, Ok(1200));
            assert_eq!(store.get_long(StoredKey::FullRaw, 0).await, Ok(-419_000));
        });
    }

    #[test]
    fn values_survive_reopening_the_flash() {
        let mut flash = RamFlash::new();
        block_on(async {
            let mut store = FlashKeyValueStore::new(&mut flash, 0..RamFlash::CAPACITY as u32);
            store.put_bool(StoredKey::DoubleResetFlag, true).await.unwrap();
            store.put_string(StoredKey::Hostname, "henhouse").await.unwrap();
        });

        let mut reopened = FlashKeyValueStore::new(&mut flash, 0..RamFlash::CAPACITY as u32);
        block_on(async {
            assert_eq!(
                reopened.get_bool(StoredKey::DoubleResetFlag, false).await,
                Ok(true)
            );
            assert_eq!(
                reopened
                    .get_string(StoredKey::Hostname, "coopfeeder")
                    .await
                    .unwrap()
                    .as_str(),
                "henhouse"
            );
        });
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut store = new_store();
        block_on(async {
            store.put_bool(StoredKey::WifiEnabled, false).await.unwrap();
            assert_eq!(
                store.get_int(StoredKey::WifiEnabled, 0).await,
                Err(StorageError::TypeMismatch)
            );
        });
    }

    #[test]
    fn many_rewrites_wrap_around_pages() {
        let mut store = new_store();
        block_on(async {
            for delay in 0..600 {
                store.put_int(StoredKey::TimerDelay, delay).await.unwrap();
            }
            assert_eq!(store.get_int(StoredKey::TimerDelay, 0).await, Ok(599));
        });
    }

    #[test]
    fn erase_all_forgets_everything() {
        let mut store = new_store();
        block_on(async {
            store.put_int(StoredKey::TimerDelay, 500).await.unwrap();
            store.erase_all().await.unwrap();
            assert_eq!(store.fetch(StoredKey::TimerDelay).await, Ok(None));
        });
    }
}
