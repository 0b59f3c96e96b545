//! Persisted device settings.
//!
//! The blob carries a magic number, a layout version and a CRC-32 over every
//! other field; anything that fails validation on load is replaced by defaults.
//! The dispatcher is the only writer. Other tasks read snapshots.

use crate::error::{PropError, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const MAGIC: u32 = 0x5347_4631;
pub const VERSION: u16 = 1;
pub const MAX_SSID: usize = 32;
pub const MAX_PASSWORD: usize = 64;
pub const MAX_VOLUME: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsBlob {
    pub magic: u32,
    pub version: u16,
    /// 0..=254; 255 is the broadcast address.
    pub device_id: u8,
    pub ssid: String,
    pub password: String,
    pub volume: u8,
    pub crc32: u32,
}

impl Default for SettingsBlob {
    fn default() -> Self {
        let mut blob = Self {
            magic: MAGIC,
            version: VERSION,
            device_id: 0,
            ssid: String::new(),
            password: String::new(),
            volume: 20,
            crc32: 0,
        };
        blob.finalize();
        blob
    }
}

impl SettingsBlob {
    fn checksum(&self) -> u32 {
        let mut bytes = Vec::with_capacity(10 + self.ssid.len() + self.password.len());
        bytes.extend_from_slice(&self.magic.to_le_bytes());
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.push(self.device_id);
        bytes.push(self.volume);
        bytes.extend_from_slice(self.ssid.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(self.password.as_bytes());
        bytes.push(0);
        crc32(&bytes)
    }

    /// Recompute the checksum after editing fields.
    pub fn finalize(&mut self) {
        self.crc32 = self.checksum();
    }

    /// # Errors
    /// Returns `PropError::Settings` naming the first check that failed.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(PropError::Settings(format!("bad magic 0x{:08X}", self.magic)));
        }
        if self.version != VERSION {
            return Err(PropError::Settings(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.crc32 != self.checksum() {
            return Err(PropError::Settings("checksum mismatch".to_string()));
        }
        check_device_id(self.device_id)?;
        check_volume(self.volume)?;
        check_len("ssid", &self.ssid, MAX_SSID)?;
        check_len("password", &self.password, MAX_PASSWORD)?;
        Ok(())
    }
}

fn check_device_id(id: u8) -> Result<()> {
    if id > crate::net::protocol::MAX_NODE_ID {
        return Err(PropError::Settings(format!("device id {id} out of range (0-254)")));
    }
    Ok(())
}

fn check_volume(volume: u8) -> Result<()> {
    if volume > MAX_VOLUME {
        return Err(PropError::Settings(format!(
            "volume {volume} out of range (0-{MAX_VOLUME})"
        )));
    }
    Ok(())
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(PropError::Settings(format!("{field} longer than {max} bytes")));
    }
    Ok(())
}

/// CRC-32 (IEEE, reflected).
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Settings file plus the in-memory copy every task reads from.
pub struct SettingsStore {
    path: PathBuf,
    current: ArcSwap<SettingsBlob>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: ArcSwap::from_pointee(SettingsBlob::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored blob, seeding and saving defaults if it is missing or invalid.
    ///
    /// # Errors
    /// Returns an error if defaults cannot be persisted and read back. The
    /// in-memory defaults stay usable either way.
    pub fn begin(&self) -> Result<()> {
        match self.load() {
            Ok(()) => {
                info!("settings restored from {}", self.path.display());
                Ok(())
            }
            Err(e) => {
                warn!("settings invalid ({e}), seeding defaults");
                self.set_defaults();
                self.save()?;
                self.load()
            }
        }
    }

    /// Replace the in-memory settings with the stored blob.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable or fails validation; the
    /// current settings are left untouched.
    pub fn load(&self) -> Result<()> {
        let content = std::fs::read_to_string(&self.path)?;
        let blob: SettingsBlob = serde_json::from_str(&content)?;
        blob.validate()?;
        self.current.store(Arc::new(blob));
        Ok(())
    }

    /// Persist the current settings with a fresh checksum.
    ///
    /// # Errors
    /// Returns `PropError::Io` or `PropError::Json` if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        let mut blob = (*self.snapshot()).clone();
        blob.finalize();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&blob)?)?;
        std::fs::rename(&tmp, &self.path)?;
        self.current.store(Arc::new(blob));
        Ok(())
    }

    /// Reset the in-memory settings. Not saved.
    pub fn set_defaults(&self) {
        self.current.store(Arc::new(SettingsBlob::default()));
    }

    pub fn snapshot(&self) -> Arc<SettingsBlob> {
        self.current.load_full()
    }

    pub fn device_id(&self) -> u8 {
        self.current.load().device_id
    }

    pub fn volume(&self) -> u8 {
        self.current.load().volume
    }

    fn update(&self, edit: impl Fn(&mut SettingsBlob)) {
        self.current.rcu(|cur| {
            let mut next = SettingsBlob::clone(cur);
            edit(&mut next);
            next.finalize();
            next
        });
    }

    /// # Errors
    /// Returns `PropError::Settings` if `id` is the broadcast id.
    pub fn set_device_id(&self, id: u8) -> Result<()> {
        check_device_id(id)?;
        self.update(|s| s.device_id = id);
        Ok(())
    }

    /// # Errors
    /// Returns `PropError::Settings` if `volume` is above the module's range.
    pub fn set_volume(&self, volume: u8) -> Result<()> {
        check_volume(volume)?;
        self.update(|s| s.volume = volume);
        Ok(())
    }

    /// # Errors
    /// Returns `PropError::Settings` if the SSID is too long.
    pub fn set_ssid(&self, ssid: &str) -> Result<()> {
        check_len("ssid", ssid, MAX_SSID)?;
        self.update(|s| s.ssid = ssid.to_string());
        Ok(())
    }

    /// # Errors
    /// Returns `PropError::Settings` if the password is too long.
    pub fn set_password(&self, password: &str) -> Result<()> {
        check_len("password", password, MAX_PASSWORD)?;
        self.update(|s| s.password = password.to_string());
        Ok(())
    }
}
