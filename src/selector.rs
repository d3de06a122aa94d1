//! Engine Selector: which engine the session uses, read from a persisted
//! preference that survives reloads.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    rc::Rc,
};

use tracing::{info, warn};

use crate::{
    engine::EngineKind,
    error::{Error, Result},
};

/// String key-value storage that outlives a session.
pub trait PreferenceStore {
    /// Stored value of `key`, `None` when unset.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Preferences kept as a flat JSON object in one file.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`; the file is created on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        // A corrupt file is replaced rather than blocking the switch.
        let mut all = self.read_all().unwrap_or_default();
        all.insert(key.to_owned(), value.to_owned());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process store; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Reads and writes the engine preference.
#[derive(Clone)]
pub struct EngineSelector {
    store: Rc<dyn PreferenceStore>,
    key: String,
    default: EngineKind,
}

impl EngineSelector {
    /// Selector over `key` in `store`, falling back to `default`.
    pub fn new(store: Rc<dyn PreferenceStore>, key: impl Into<String>, default: EngineKind) -> Self {
        Self {
            store,
            key: key.into(),
            default,
        }
    }

    /// The persisted engine, or the default when unset, unreadable or not a
    /// known engine name.
    pub fn active_engine(&self) -> EngineKind {
        match self.store.get(&self.key) {
            Ok(Some(value)) => value.parse().unwrap_or_else(|err: Error| {
                warn!(key = %self.key, error = %err, "ignoring stored engine preference");
                self.default
            }),
            Ok(None) => self.default,
            Err(err) => {
                warn!(key = %self.key, error = %err, "engine preference unreadable");
                self.default
            }
        }
    }

    /// Validate and persist `name`. The caller is responsible for reloading
    /// the page context afterwards.
    pub fn set_active_engine(&self, name: &str) -> Result<EngineKind> {
        let engine: EngineKind = name.parse()?;
        self.store.set(&self.key, engine.as_str())?;
        info!(engine = %engine, "math engine preference saved");
        Ok(engine)
    }
}
