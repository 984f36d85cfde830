//! Host settings store and per-extension storage.
//!
//! The host keeps one JSON document with install records and one blob per
//! extension under `plugin:<id>`. Extensions only ever see their own blob
//! through [`ExtensionStorage`].

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::{Map, Value};

use super::disposer::ignore_non_fatal;
use super::error::{ExtensionError, ExtensionResult};

/// Key of an extension's storage blob in the host store.
pub fn storage_key(extension_id: &str) -> String {
    format!("plugin:{extension_id}")
}

/// Host-wide key-value document.
///
/// Values are cached in memory and written to disk on every modification.
/// A store without a path lives in memory only.
#[derive(Debug, Default)]
pub struct HostStore {
    path: Option<PathBuf>,
    data: Map<String, Value>,
    dirty: bool,
}

impl HostStore {
    /// Open the store at `path`. A missing or unparseable file yields an
    /// empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "Settings store is not a JSON object, starting empty");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self {
            path: Some(path),
            data,
            dirty: false,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> ExtensionResult<()> {
        self.data.insert(key.to_string(), value);
        self.dirty = true;
        self.flush()
    }

    pub fn remove(&mut self, key: &str) -> ExtensionResult<bool> {
        if self.data.remove(key).is_none() {
            return Ok(false);
        }
        self.dirty = true;
        self.flush()?;
        Ok(true)
    }

    /// Flush cached changes to disk.
    pub fn flush(&mut self) -> ExtensionResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ExtensionError::io("Failed to create settings directory", e))?;
        }
        let contents = serde_json::to_string_pretty(&self.data)?;
        fs::write(path, contents).map_err(|e| ExtensionError::io("Failed to write settings", e))?;

        self.dirty = false;
        Ok(())
    }
}

impl Drop for HostStore {
    fn drop(&mut self) {
        ignore_non_fatal("flush settings store", || self.flush());
    }
}

/// One extension's view of the host store.
///
/// Reads never fail: a missing or malformed blob reads as empty. Writes
/// fail with `ContextRevoked` once the owning context is revoked.
#[derive(Debug, Clone)]
pub struct ExtensionStorage {
    extension_id: String,
    store: Rc<RefCell<HostStore>>,
    revoked: Rc<Cell<bool>>,
}

impl ExtensionStorage {
    pub fn new(extension_id: &str, store: Rc<RefCell<HostStore>>) -> Self {
        Self {
            extension_id: extension_id.to_string(),
            store,
            revoked: Rc::new(Cell::new(false)),
        }
    }

    /// Share the revoked flag of the owning context.
    pub(crate) fn with_revoked(mut self, revoked: Rc<Cell<bool>>) -> Self {
        self.revoked = revoked;
        self
    }

    fn writable(&self) -> ExtensionResult<()> {
        if self.revoked.get() {
            return Err(ExtensionError::ContextRevoked(self.extension_id.clone()));
        }
        Ok(())
    }

    fn blob(&self) -> Map<String, Value> {
        match self.store.borrow().get(&storage_key(&self.extension_id)) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    fn write_blob(&self, blob: Map<String, Value>) -> ExtensionResult<()> {
        self.store
            .borrow_mut()
            .set(&storage_key(&self.extension_id), Value::Object(blob))
    }

    /// Get a value, or `None` if it was never stored.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.blob().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) -> ExtensionResult<()> {
        self.writable()?;
        let mut blob = self.blob();
        blob.insert(key.to_string(), value);
        self.write_blob(blob)
    }

    pub fn remove(&self, key: &str) -> ExtensionResult<()> {
        self.writable()?;
        let mut blob = self.blob();
        if blob.remove(key).is_some() {
            self.write_blob(blob)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.blob().keys().cloned().collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.blob().contains_key(key)
    }

    /// Remove the whole blob.
    pub fn clear(&self) -> ExtensionResult<()> {
        self.writable()?;
        self.store
            .borrow_mut()
            .remove(&storage_key(&self.extension_id))
            .map(|_| ())
    }
}
