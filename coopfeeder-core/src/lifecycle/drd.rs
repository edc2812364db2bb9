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

//! Double reset detection. Two resets inside [`DRD_TIMEOUT`] of each other ask for
//! configuration mode.

use crate::storage::{KeyValueStore, StoredKey};
use embassy_time::{Duration, Instant};

pub const DRD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DrdPoll {
    /// Nothing to do, either the window is still open or the flag is already clear.
    Idle,
    Cleared,
    /// Clearing the flag failed, it is tried again next poll.
    ClearFailed,
}

pub struct DoubleResetDetector {
    verdict: Option<bool>,
    needs_clear: bool,
}

impl Default for DoubleResetDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubleResetDetector {
    pub const fn new() -> Self {
        Self {
            verdict: None,
            needs_clear: false,
        }
    }

    /// Reads the flag left by the previous boot, then arms it for the next one. The verdict is
    /// cached so repeated calls do not see the flag this call just set.
    pub async fn evaluate<S: KeyValueStore>(&mut self, store: &mut S) -> bool {
        if let Some(verdict) = self.verdict {
            return verdict;
        }

        let detected = store
            .get_bool(StoredKey::DoubleResetFlag, false)
            .await
            .unwrap_or_else(|e| {
                warn!("Unable to read double reset flag: {:?}", e);
                false
            });

        if let Err(e) = store.put_bool(StoredKey::DoubleResetFlag, true).await {
            warn!("Unable to arm double reset flag: {:?}", e);
        }
        self.needs_clear = true;
        self.verdict = Some(detected);

        if detected {
            info!("Double reset detected");
        } else {
            debug!("No double reset");
        }
        detected
    }

    pub fn verdict(&self) -> Option<bool> {
        self.verdict
    }

    /// Purely a function of time since boot.
    pub fn window_open(&self, now: Instant) -> bool {
        now.as_ticks() < DRD_TIMEOUT.as_ticks()
    }

    /// Clears the armed flag once the window has closed. Succeeds at most once per boot.
    pub async fn poll<S: KeyValueStore>(&mut self, store: &mut S, now: Instant) -> DrdPoll {
        if !self.needs_clear || self.window_open(now) {
            return DrdPoll::Idle;
        }

        match store.put_bool(StoredKey::DoubleResetFlag, false).await {
            Ok(()) => {
                self.needs_clear = false;
                debug!("Double reset window closed at {} ms", now.as_millis());
                DrdPoll::Cleared
            }
            Err(e) => {
                warn!("Unable to clear double reset flag: {:?}", e);
                DrdPoll::ClearFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoredValue;
    use crate::test_support::MemoryStore;
    use embassy_futures::block_on;

    #[test]
    fn flag_from_previous_boot_is_detected_and_rearmed() {
        let mut store = MemoryStore::new();
        store.insert(StoredKey::DoubleResetFlag, StoredValue::Bool(true));
        let mut drd = DoubleResetDetector::new();

        assert!(block_on(drd.evaluate(&mut store)));
        assert_eq!(store.bool(StoredKey::DoubleResetFlag), Some(true));
    }

    #[test]
    fn clean_boot_arms_the_flag() {
        let mut store = MemoryStore::new();
        let mut drd = DoubleResetDetector::new();

        assert!(!block_on(drd.evaluate(&mut store)));
        assert_eq!(store.bool(StoredKey::DoubleResetFlag), Some(true));
    }

    #[test]
    fn evaluation_is_idempotent_within_the_window() {
        let mut store = MemoryStore::new();
        let mut drd = DoubleResetDetector::new();

        block_on(async {
            let first = drd.evaluate(&mut store).await;
            let writes = store.write_count();
            let second = drd.evaluate(&mut store).await;

            assert_eq!(first, second);
            assert!(!second);
            assert_eq!(store.write_count(), writes);
            assert!(drd.window_open(Instant::from_millis(9_999)));
            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(9_999)).await,
                DrdPoll::Idle
            );
        });
    }

    #[test]
    fn flag_is_cleared_exactly_once_after_timeout() {
        let mut store = MemoryStore::new();
        store.insert(StoredKey::DoubleResetFlag, StoredValue::Bool(true));
        let mut drd = DoubleResetDetector::new();

        block_on(async {
            assert!(drd.evaluate(&mut store).await);
            let writes = store.write_count();

            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(10_000)).await,
                DrdPoll::Cleared
            );
            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(10_250)).await,
                DrdPoll::Idle
            );
            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(60_000)).await,
                DrdPoll::Idle
            );
            assert_eq!(store.write_count(), writes + 1);
        });
        assert_eq!(store.bool(StoredKey::DoubleResetFlag), Some(false));
        assert!(!drd.window_open(Instant::from_millis(10_000)));
    }

    #[test]
    fn failed_clear_is_retried() {
        let mut store = MemoryStore::new();
        let mut drd = DoubleResetDetector::new();

        block_on(async {
            drd.evaluate(&mut store).await;

            store.fail_writes = true;
            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(10_000)).await,
                DrdPoll::ClearFailed
            );

            store.fail_writes = false;
            assert_eq!(
                drd.poll(&mut store, Instant::from_millis(10_100)).await,
                DrdPoll::Cleared
            );
        });
        assert_eq!(store.bool(StoredKey::DoubleResetFlag), Some(false));
    }

    #[test]
    fn poll_before_evaluation_does_nothing() {
        let mut store = MemoryStore::new();
        let mut drd = DoubleResetDetector::new();
        assert_eq!(
            block_on(drd.poll(&mut store, Instant::from_millis(20_000))),
            DrdPoll::Idle
        );
        assert_eq!(store.write_count(), 0);
    }
}
