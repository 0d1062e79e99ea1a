//! Stored shutdown targets.
//!
//! [`ShutdownTargets`] is a plain value handed to the shutdown hook. Where
//! it lives between runs is up to a [`TargetStore`]: a TOML file in the
//! user's config directory, or memory for tests and embedders.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use blecmd_types::PeripheralAddress;

use crate::error::Result;

/// A scale and the kind of scale it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTarget {
    pub address: PeripheralAddress,
    /// Scale family as reported by whoever paired it (e.g. "decent").
    pub scale_type: String,
}

/// Peripherals to put to sleep when the host goes away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<PeripheralAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleTarget>,
}

impl ShutdownTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_machine(&mut self, address: PeripheralAddress) {
        debug!(%address, "Storing machine address");
        self.machine = Some(address);
    }

    pub fn clear_machine(&mut self) {
        debug!("Clearing machine address");
        self.machine = None;
    }

    /// Store the scale address together with its type.
    pub fn set_scale(&mut self, address: PeripheralAddress, scale_type: impl Into<String>) {
        let scale_type = scale_type.into();
        debug!(%address, %scale_type, "Storing scale address");
        self.scale = Some(ScaleTarget {
            address,
            scale_type,
        });
    }

    /// Forget the scale address and its type.
    pub fn clear_scale(&mut self) {
        debug!("Clearing scale address");
        self.scale = None;
    }

    pub fn is_empty(&self) -> bool {
        self.machine.is_none() && self.scale.is_none()
    }
}

/// Load/save for [`ShutdownTargets`].
pub trait TargetStore: Send + Sync {
    /// Current targets; empty when nothing was saved yet.
    fn load(&self) -> Result<ShutdownTargets>;

    fn save(&self, targets: &ShutdownTargets) -> Result<()>;
}

/// Targets stored as TOML on disk.
#[derive(Debug, Clone)]
pub struct FileTargetStore {
    path: PathBuf,
}

impl FileTargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<config dir>/blecmd/targets.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blecmd")
            .join("targets.toml")
    }

    /// Store at the default location.
    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TargetStore for FileTargetStore {
    fn load(&self) -> Result<ShutdownTargets> {
        if !self.path.exists() {
            return Ok(ShutdownTargets::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, targets: &ShutdownTargets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(targets)?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "Saved shutdown targets");
        Ok(())
    }
}

/// Targets kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    targets: Mutex<ShutdownTargets>,
}

impl MemoryTargetStore {
    pub fn new(targets: ShutdownTargets) -> Self {
        Self {
            targets: Mutex::new(targets),
        }
    }
}

impl TargetStore for MemoryTargetStore {
    fn load(&self) -> Result<ShutdownTargets> {
        Ok(self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, targets: &ShutdownTargets) -> Result<()> {
        *self.targets.lock().unwrap_or_else(PoisonError::into_inner) = targets.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn addr(s: &str) -> PeripheralAddress {
        PeripheralAddress::new(s).unwrap()
    }

    #[test]
    fn test_set_and_clear_targets() {
        let mut targets = ShutdownTargets::new();
        assert!(targets.is_empty());

        targets.set_machine(addr("AA:BB:CC:DD:EE:01"));
        targets.set_scale(addr("AA:BB:CC:DD:EE:02"), "decent");
        assert_eq!(targets.machine, Some(addr("AA:BB:CC:DD:EE:01")));
        assert_eq!(
            targets.scale.as_ref().map(|s| s.scale_type.as_str()),
            Some("decent")
        );

        targets.clear_scale();
        assert!(targets.scale.is_none());
        assert!(targets.machine.is_some());

        targets.clear_machine();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTargetStore::new(dir.path().join("targets.toml"));
        assert_eq!(store.load().unwrap(), ShutdownTargets::default());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTargetStore::new(dir.path().join("nested").join("targets.toml"));

        let mut targets = ShutdownTargets::new();
        targets.set_machine(addr("AA:BB:CC:DD:EE:01"));
        targets.set_scale(addr("AA:BB:CC:DD:EE:02"), "acaia");
        store.save(&targets).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains(r#"machine = "AA:BB:CC:DD:EE:01""#));
        assert!(content.contains(r#"scale_type = "acaia""#));

        assert_eq!(store.load().unwrap(), targets);
    }

    #[test]
    fn test_file_store_rejects_empty_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        fs::write(&path, "machine = \"\"\n").unwrap();

        let err = FileTargetStore::new(path).load().unwrap_err();
        assert!(matches!(err, Error::TomlDecode(_)));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTargetStore::default();
        assert!(store.load().unwrap().is_empty());

        let mut targets = ShutdownTargets::new();
        targets.set_machine(addr("de1"));
        store.save(&targets).unwrap();
        assert_eq!(store.load().unwrap().machine, Some(addr("de1")));
    }

    #[test]
    fn test_default_path() {
        let path = FileTargetStore::default_path();
        assert!(path.ends_with("blecmd/targets.toml"));
    }
}
