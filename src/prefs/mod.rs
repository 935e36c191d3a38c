//! Persistent node preferences: the learned host MAC and WiFi channel.
//!
//! The backing key/value store (NVS on real hardware) is consumed through
//! [`PreferenceStore`]; [`NodePreferences`] layers the typed accessors and the
//! validity rules on top. Either both values are present and valid, in which
//! case `setup()` skips discovery, or a discovery cycle must run.

use std::collections::HashMap;

use crate::core::{is_valid_wifi_channel, MacAddress, PrefsError};

/// Store key for the 6-byte host MAC blob.
pub const KEY_HOST_MAC: &str = "host_mac";

/// Store key for the WiFi channel byte.
pub const KEY_HOST_CHANNEL: &str = "host_channel";

/// Contract of the backing key/value store.
///
/// Writes become durable together at the next [`PreferenceStore::commit`].
pub trait PreferenceStore {
    /// Store a byte blob under `key`.
    fn set_blob(&mut self, key: &'static str, value: &[u8]) -> Result<(), PrefsError>;

    /// Read the blob under `key` into `out`; returns the stored length.
    fn get_blob(&self, key: &'static str, out: &mut [u8]) -> Result<usize, PrefsError>;

    /// Store a byte under `key`.
    fn set_u8(&mut self, key: &'static str, value: u8) -> Result<(), PrefsError>;

    /// Read the byte under `key`.
    fn get_u8(&self, key: &'static str) -> Result<u8, PrefsError>;

    /// Erase every key.
    fn erase_all(&mut self) -> Result<(), PrefsError>;

    /// Make all writes since the last commit durable, atomically.
    fn commit(&mut self) -> Result<(), PrefsError>;
}

/// Typed view over the store for the node's two persisted values.
pub struct NodePreferences<P: PreferenceStore> {
    store: P,
}

impl<P: PreferenceStore> NodePreferences<P> {
    /// Wrap a store.
    pub fn new(store: P) -> Self {
        Self { store }
    }

    /// The persisted host MAC, if present and well-formed.
    pub fn host_mac(&self) -> Option<MacAddress> {
        let mut buf = [0u8; 6];
        match self.store.get_blob(KEY_HOST_MAC, &mut buf) {
            Ok(6) => Some(MacAddress::from_bytes(buf)),
            _ => None,
        }
    }

    /// Persist the host MAC (not yet committed).
    pub fn set_host_mac(&mut self, mac: MacAddress) -> Result<(), PrefsError> {
        self.store.set_blob(KEY_HOST_MAC, mac.as_bytes())
    }

    /// The persisted WiFi channel, if present and in `[1, 14]`. An
    /// out-of-range byte means "absent".
    pub fn channel(&self) -> Option<u8> {
        match self.store.get_u8(KEY_HOST_CHANNEL) {
            Ok(channel) if is_valid_wifi_channel(channel) => Some(channel),
            _ => None,
        }
    }

    /// Persist the WiFi channel (not yet committed).
    pub fn set_channel(&mut self, channel: u8) -> Result<(), PrefsError> {
        self.store.set_u8(KEY_HOST_CHANNEL, channel)
    }

    /// Erase all stored preferences.
    pub fn erase_all(&mut self) -> Result<(), PrefsError> {
        self.store.erase_all()
    }

    /// Commit pending writes.
    pub fn commit(&mut self) -> Result<(), PrefsError> {
        self.store.commit()
    }
}

/// In-memory [`PreferenceStore`] for tests and examples.
///
/// Reads observe uncommitted writes, like NVS does; `commit` is a no-op
/// because nothing outlives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<&'static str, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn set_blob(&mut self, key: &'static str, value: &[u8]) -> Result<(), PrefsError> {
        self.entries.insert(key, value.to_vec());
        Ok(())
    }

    fn get_blob(&self, key: &'static str, out: &mut [u8]) -> Result<usize, PrefsError> {
        let value = self.entries.get(key).ok_or(PrefsError::NotFound(key))?;
        if out.len() < value.len() {
            return Err(PrefsError::InvalidValue(key));
        }
        out[..value.len()].copy_from_slice(value);
        Ok(value.len())
    }

    fn set_u8(&mut self, key: &'static str, value: u8) -> Result<(), PrefsError> {
        self.entries.insert(key, vec![value]);
        Ok(())
    }

    fn get_u8(&self, key: &'static str) -> Result<u8, PrefsError> {
        match self.entries.get(key) {
            Some(value) if value.len() == 1 => Ok(value[0]),
            Some(_) => Err(PrefsError::InvalidValue(key)),
            None => Err(PrefsError::NotFound(key)),
        }
    }

    fn erase_all(&mut self) -> Result<(), PrefsError> {
        self.entries.clear();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), PrefsError> {
        Ok(())
    }
}
