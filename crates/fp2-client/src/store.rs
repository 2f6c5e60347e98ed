//! Persistence of pairing material between runs.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hap_core::{DeviceId, Error, Result};
use hap_pairing::PairingMaterial;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Keeps `PairingMaterial` per device id.
pub trait PairingStore: Send + Sync {
    fn load(&self, id: &DeviceId) -> Result<Option<PairingMaterial>>;

    fn load_all(&self) -> Result<BTreeMap<DeviceId, PairingMaterial>>;

    fn save(&self, id: &DeviceId, material: &PairingMaterial) -> Result<()>;

    /// Returns whether an entry existed.
    fn remove(&self, id: &DeviceId) -> Result<bool>;
}

/// In-process store, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    entries: Mutex<HashMap<DeviceId, PairingMaterial>>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, PairingMaterial>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PairingStore for MemoryPairingStore {
    fn load(&self, id: &DeviceId) -> Result<Option<PairingMaterial>> {
        Ok(self.entries().get(id).cloned())
    }

    fn load_all(&self) -> Result<BTreeMap<DeviceId, PairingMaterial>> {
        Ok(self
            .entries()
            .iter()
            .map(|(id, material)| (*id, material.clone()))
            .collect())
    }

    fn save(&self, id: &DeviceId, material: &PairingMaterial) -> Result<()> {
        self.entries().insert(*id, material.clone());
        Ok(())
    }

    fn remove(&self, id: &DeviceId) -> Result<bool> {
        Ok(self.entries().remove(id).is_some())
    }
}

/// JSON object on disk keyed by device id, readable by the owner only.
///
/// Top-level keys that are not device ids are carried through untouched so
/// the file can be shared with other settings.
#[derive(Debug, Clone)]
pub struct JsonFilePairingStore {
    path: PathBuf,
}

impl JsonFilePairingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is empty. An unreadable one is logged and treated as
    /// empty, so the next save replaces it.
    fn read(&self) -> Result<Map<String, Value>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(storage(&self.path, e)),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                warn!(path = %self.path.display(), "pairing file is not a JSON object, ignoring it");
                Ok(Map::new())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot parse pairing file, ignoring it");
                Ok(Map::new())
            }
        }
    }

    fn write(&self, map: &Map<String, Value>) -> Result<()> {
        let text = serde_json::to_string_pretty(map).map_err(|e| storage(&self.path, e))?;
        let tmp = self.path.with_extension("tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| storage(&tmp, e))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| storage(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, e))?;

        debug!(path = %self.path.display(), entries = map.len(), "pairing file written");
        Ok(())
    }
}

impl PairingStore for JsonFilePairingStore {
    fn load(&self, id: &DeviceId) -> Result<Option<PairingMaterial>> {
        let map = self.read()?;
        match map.get(&id.to_string()) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| storage(&self.path, e)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> Result<BTreeMap<DeviceId, PairingMaterial>> {
        let mut all = BTreeMap::new();
        for (key, value) in self.read()? {
            let Ok(id) = key.parse::<DeviceId>() else {
                continue;
            };
            match serde_json::from_value::<PairingMaterial>(value) {
                Ok(material) => {
                    all.insert(id, material);
                }
                Err(e) => warn!(device = %id, error = %e, "skipping unreadable pairing"),
            }
        }
        Ok(all)
    }

    fn save(&self, id: &DeviceId, material: &PairingMaterial) -> Result<()> {
        let mut map = self.read()?;
        let value = serde_json::to_value(material).map_err(|e| storage(&self.path, e))?;
        map.insert(id.to_string(), value);
        self.write(&map)
    }

    fn remove(&self, id: &DeviceId) -> Result<bool> {
        let mut map = self.read()?;
        if map.remove(&id.to_string()).is_none() {
            return Ok(false);
        }
        self.write(&map)?;
        Ok(true)
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}
