// Persisted local settings
//
// A flat key -> JSON value store. Every setting is loaded independently and
// falls back to its default when absent or unreadable, so a corrupt entry
// never blocks playback.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Setting keys
pub mod keys {
    pub const METRONOME_ENABLED: &str = "metronome.enabled";
    pub const METRONOME_OFFSET_MS: &str = "metronome.offset_ms";
    pub const VOLUME_TRACK: &str = "volume.track";
    pub const VOLUME_CLICK: &str = "volume.click";
    pub const VOLUME_MASTER: &str = "volume.master";
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings file is not a JSON object: {0}")]
    NotAnObject(PathBuf),
}

/// Key -> JSON-encoded value storage
pub trait SettingsStore {
    /// Raw JSON text stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Store JSON text under `key`
    fn set(&mut self, key: &str, json: String) -> Result<(), SettingsError>;
}

/// Load `key`, or `default` when it is missing or malformed
pub fn load_or<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str, default: T) -> T {
    let Some(raw) = store.get(key) else {
        return default;
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Ignoring corrupt setting '{}' ({}): {}", key, raw, e);
            default
        }
    }
}

/// Save `value` under `key`; failures are logged, not returned
pub fn save<T: Serialize>(store: &mut dyn SettingsStore, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(SettingsError::from)
        .and_then(|json| store.set(key, json));
    if let Err(e) = result {
        log::warn!("Could not save setting '{}': {}", key, e);
    }
}

/// Volatile store, for tests and headless sessions
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, json: String) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), json);
        Ok(())
    }
}

/// Settings kept in a single JSON object on disk
///
/// Every `set` rewrites the file through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Default location: `<config dir>/looptrack/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("looptrack").join("settings.json"))
    }

    /// Open the store at `path`
    ///
    /// A missing file is an empty store. A file that does not parse is
    /// logged and replaced by an empty store on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    log::warn!("{}", SettingsError::NotAnObject(path.clone()));
                    Map::new()
                }
                Err(e) => {
                    log::warn!("Corrupt settings file {}: {}", path.display(), e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(Value::to_string)
    }

    fn set(&mut self, key: &str, json: String) -> Result<(), SettingsError> {
        let value: Value = serde_json::from_str(&json)?;
        self.values.insert(key.to_string(), value);
        self.flush()
    }
}
