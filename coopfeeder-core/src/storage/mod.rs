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

use core::future::Future;
use heapless::String;
use sequential_storage::map::{SerializationError, Value};
use strum::{EnumIter, IntoStaticStr};

pub mod flash_store;

pub use flash_store::FlashKeyValueStore;

pub const TEXT_CAPACITY: usize = 32;
pub type StoredText = String<TEXT_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    SaveError,
    RetrieveError,
    /// A value exists under the key but holds a different type.
    TypeMismatch,
}

/// Everything the node persists. Discriminants are the on-flash key ids and must never be reused.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoredKey {
    #[strum(serialize = "empty_offset")]
    EmptyOffset = 0,
    #[strum(serialize = "full_raw")]
    FullRaw = 1,
    #[strum(serialize = "timerdelay")]
    TimerDelay = 2,
    #[strum(serialize = "DRD")]
    DoubleResetFlag = 3,
    #[strum(serialize = "hostname")]
    Hostname = 4,
    #[strum(serialize = "wifi")]
    WifiEnabled = 5,
}

impl StoredKey {
    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoredValue {
    Long(i64),
    Int(i32),
    Bool(bool),
    Text(StoredText),
}

impl StoredValue {
    fn tag(&self) -> u8 {
        match self {
            StoredValue::Long(_) => 0,
            StoredValue::Int(_) => 1,
            StoredValue::Bool(_) => 2,
            StoredValue::Text(_) => 3,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            StoredValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            StoredValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoredValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StoredValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl Value<'_> for StoredValue {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let mut payload = [0u8; TEXT_CAPACITY];
        let payload_len = match self {
            StoredValue::Long(v) => {
                payload[..8].copy_from_slice(&v.to_le_bytes());
                8
            }
            StoredValue::Int(v) => {
                payload[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
            StoredValue::Bool(v) => {
                payload[0] = u8::from(*v);
                1
            }
            StoredValue::Text(v) => {
                payload[..v.len()].copy_from_slice(v.as_bytes());
                v.len()
            }
        };
        let total_len = payload_len + 1;

        if total_len > buffer.len() {
            return Err(SerializationError::BufferTooSmall);
        }

        buffer[0] = self.tag();
        buffer[1..total_len].copy_from_slice(&payload[..payload_len]);

        Ok(total_len)
    }

    fn deserialize_from(buffer: &[u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        let Some((&tag, payload)) = buffer.split_first() else {
            return Err(SerializationError::BufferTooSmall);
        };

        match tag {
            0 => {
                let bytes: [u8; 8] = payload
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(SerializationError::BufferTooSmall)?;
                Ok(StoredValue::Long(i64::from_le_bytes(bytes)))
            }
            1 => {
                let bytes: [u8; 4] = payload
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(SerializationError::BufferTooSmall)?;
                Ok(StoredValue::Int(i32::from_le_bytes(bytes)))
            }
            2 => match payload.first() {
                Some(0) => Ok(StoredValue::Bool(false)),
                Some(1) => Ok(StoredValue::Bool(true)),
                Some(_) => Err(SerializationError::InvalidData),
                None => Err(SerializationError::BufferTooSmall),
            },
            3 => {
                let text =
                    core::str::from_utf8(payload).map_err(|_| SerializationError::InvalidData)?;
                let text = StoredText::try_from(text).map_err(|_| SerializationError::InvalidData)?;
                Ok(StoredValue::Text(text))
            }
            _ => Err(SerializationError::InvalidFormat),
        }
    }
}

/// Durable key/value persistence. A successful `store` must survive power loss.
///
/// The typed getters return `default` when nothing has been stored under the key yet.
pub trait KeyValueStore {
    fn fetch(
        &mut self,
        key: StoredKey,
    ) -> impl Future<Output = Result<Option<StoredValue>, StorageError>>;

    fn store(
        &mut self,
        key: StoredKey,
        value: &StoredValue,
    ) -> impl Future<Output = Result<(), StorageError>>;

    /// Removes every stored key. Defaults apply on the next load.
    fn erase_all(&mut self) -> impl Future<Output = Result<(), StorageError>>;

    fn get_long(
        &mut self,
        key: StoredKey,
        default: i64,
    ) -> impl Future<Output = Result<i64, StorageError>> {
        async move {
            match self.fetch(key).await? {
                None => Ok(default),
                Some(v) => v.as_long().ok_or(StorageError::TypeMismatch),
            }
        }
    }

    fn put_long(
        &mut self,
        key: StoredKey,
        value: i64,
    ) -> impl Future<Output = Result<(), StorageError>> {
        async move { self.store(key, &StoredValue::Long(value)).await }
    }

    fn get_int(
        &mut self,
        key: StoredKey,
        default: i32,
    ) -> impl Future<Output = Result<i32, StorageError>> {
        async move {
            match self.fetch(key).await? {
                None => Ok(default),
                Some(v) => v.as_int().ok_or(StorageError::TypeMismatch),
            }
        }
    }

    fn put_int(
        &mut self,
        key: StoredKey,
        value: i32,
    ) -> impl Future<Output = Result<(), StorageError>> {
        async move { self.store(key, &StoredValue::Int(value)).await }
    }

    fn get_bool(
        &mut self,
        key: StoredKey,
        default: bool,
    ) -> impl Future<Output = Result<bool, StorageError>> {
        async move {
            match self.fetch(key).await? {
                None => Ok(default),
                Some(v) => v.as_bool().ok_or(StorageError::TypeMismatch),
            }
        }
    }

    fn put_bool(
        &mut self,
        key: StoredKey,
        value: bool,
    ) -> impl Future<Output = Result<(), StorageError>> {
        async move { self.store(key, &StoredValue::Bool(value)).await }
    }

    fn get_string(
        &mut self,
        key: StoredKey,
        default: &str,
    ) -> impl Future<Output = Result<StoredText, StorageError>> {
        async move {
            match self.fetch(key).await? {
                None => StoredText::try_from(default).map_err(|_| StorageError::TypeMismatch),
                Some(StoredValue::Text(v)) => Ok(v),
                Some(_) => Err(StorageError::TypeMismatch),
            }
        }
    }

    fn put_string(
        &mut self,
        key: StoredKey,
        value: &str,
    ) -> impl Future<Output = Result<(), StorageError>> {
        async move {
            let text = StoredText::try_from(value).map_err(|_| StorageError::SaveError)?;
            self.store(key, &StoredValue::Text(text)).await
        }
    }
}
