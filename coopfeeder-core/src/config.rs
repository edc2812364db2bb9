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

//! Persisted device identity and connectivity settings.

use crate::storage::{KeyValueStore, StorageError, StoredKey, StoredText, TEXT_CAPACITY};

pub const DEFAULT_HOSTNAME: &str = "coopfeeder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Empty, too long, or not a DNS label.
    InvalidHostname,
    Storage(StorageError),
}

/// Setters apply the new value in memory first. A value that fails to persist stays applied and
/// is written again by [`DeviceConfig::flush`], the same as calibration and the sampling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub hostname: StoredText,
    /// Gates configuration mode after a double reset.
    pub wifi_enabled: bool,
    hostname_pending: bool,
    wifi_pending: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // fits, checked by `default_hostname_is_valid`
            hostname: StoredText::try_from(DEFAULT_HOSTNAME).unwrap_or_default(),
            wifi_enabled: true,
            hostname_pending: false,
            wifi_pending: false,
        }
    }
}

impl DeviceConfig {
    pub async fn load<S: KeyValueStore>(store: &mut S) -> Self {
        let defaults = Self::default();

        let hostname = match store.get_string(StoredKey::Hostname, DEFAULT_HOSTNAME).await {
            Ok(name) if is_valid_hostname(&name) => name,
            Ok(_) => {
                warn!("Stored hostname is not valid, using default");
                defaults.hostname
            }
            Err(e) => {
                warn!("Unable to load hostname: {:?}", e);
                defaults.hostname
            }
        };

        let wifi_enabled = store
            .get_bool(StoredKey::WifiEnabled, defaults.wifi_enabled)
            .await
            .unwrap_or_else(|e| {
                warn!("Unable to load wifi flag: {:?}", e);
                defaults.wifi_enabled
            });

        info!("Hostname {}, wifi {}", hostname.as_str(), wifi_enabled);
        Self {
            hostname,
            wifi_enabled,
            hostname_pending: false,
            wifi_pending: false,
        }
    }

    /// Takes effect after a restart.
    pub async fn set_hostname<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        hostname: &str,
    ) -> Result<(), ConfigError> {
        if !is_valid_hostname(hostname) {
            return Err(ConfigError::InvalidHostname);
        }
        self.hostname = StoredText::try_from(hostname).map_err(|_| ConfigError::InvalidHostname)?;
        self.hostname_pending = true;
        info!("Hostname set to {}", self.hostname.as_str());
        self.flush(store).await.map_err(ConfigError::Storage)
    }

    pub async fn set_wifi_enabled<S: KeyValueStore>(
        &mut self,
        store: &mut S,
        enabled: bool,
    ) -> Result<(), ConfigError> {
        self.wifi_enabled = enabled;
        self.wifi_pending = true;
        info!("Wifi provisioning {}", enabled);
        self.flush(store).await.map_err(ConfigError::Storage)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.hostname_pending || self.wifi_pending
    }

    pub fn discard_pending(&mut self) {
        self.hostname_pending = false;
        self.wifi_pending = false;
    }

    /// Writes every setting whose last save failed.
    pub async fn flush<S: KeyValueStore>(&mut self, store: &mut S) -> Result<(), StorageError> {
        let mut result = Ok(());

        if self.hostname_pending {
            match store.put_string(StoredKey::Hostname, self.hostname.as_str()).await {
                Ok(()) => self.hostname_pending = false,
                Err(e) => {
                    warn!("Unable to store hostname: {:?}", e);
                    result = Err(e);
                }
            }
        }

        if self.wifi_pending {
            match store.put_bool(StoredKey::WifiEnabled, self.wifi_enabled).await {
                Ok(()) => self.wifi_pending = false,
                Err(e) => {
                    warn!("Unable to store wifi flag: {:?}", e);
                    result = Err(e);
                }
            }
        }

        result
    }
}

/// A single DNS label: 1 to 32 ASCII letters, digits or hyphens, not starting or ending with a
/// hyphen.
pub fn is_valid_hostname(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= TEXT_CAPACITY
        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        && bytes.first() != Some(&b'-')
        && bytes.last() != Some(&b'-')
}
