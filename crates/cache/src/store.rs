//! Key/value cache store
//!
//! Each key maps to one backend location holding the encoded value (a file or
//! a directory tree) and a JSON sidecar `{key}.artifact.json` holding its
//! [`Artifact`]. A key exists once its sidecar is written: values are written
//! first and committed second, and deletion removes the sidecar first.

use crate::artifact::{Artifact, SIDECAR_SUFFIX};
use crate::backend::{Backend, LocalBackend, Location};
use crate::fingerprint::Fingerprint;
use crate::registry::{AUTO, Options, Registry, Serializer};
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// What `put` does when the key already holds a committed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnExists {
    /// Fail with [`Error::DuplicateKey`]
    #[default]
    Raise,
    /// Replace the existing value
    Overwrite,
    /// Keep the existing value and do nothing
    Skip,
}

impl std::str::FromStr for OnExists {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raise" => Ok(Self::Raise),
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            other => Err(Error::configuration(format!(
                "Unknown duplicate-key policy '{other}', expected raise, overwrite or skip"
            ))),
        }
    }
}

/// Per-call options for [`CacheStore::put`]
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Serializer id; `None` or `"auto"` picks one from the value
    pub serializer: Option<String>,
    /// Overrides the store's duplicate-key policy
    pub on_exists: Option<OnExists>,
    /// Options handed to the serializer's `dump`
    pub dump_options: Options,
    /// Caller metadata recorded in the artifact
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Fingerprint of the computation that produced the value
    pub fingerprint: Option<Fingerprint>,
}

impl PutOptions {
    /// Use the serializer registered as `name`
    #[must_use]
    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = Some(name.into());
        self
    }

    /// Override the duplicate-key policy
    #[must_use]
    pub const fn on_exists(mut self, policy: OnExists) -> Self {
        self.on_exists = Some(policy);
        self
    }

    /// Set dump options
    #[must_use]
    pub fn dump_options(mut self, options: Options) -> Self {
        self.dump_options = options;
        self
    }

    /// Set artifact metadata
    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Record the producing fingerprint
    #[must_use]
    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// In-process mutual exclusion per key
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Lock handle for `key`; hold `.lock()` on it for the critical section
    ///
    /// Entries no caller holds any more are dropped on the way.
    pub(crate) fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Number of keys with a live lock handle
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Check that a key maps to a location inside the backend
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key is empty"));
    }
    if key.starts_with('/') || key.starts_with('\\') {
        return Err(Error::invalid_key(key, "key must be relative"));
    }
    if key.split(['/', '\\']).any(|s| s == ".." || s == "." || s.is_empty()) {
        return Err(Error::invalid_key(
            key,
            "key must not contain empty, '.' or '..' segments",
        ));
    }
    if key.ends_with(SIDECAR_SUFFIX) {
        return Err(Error::invalid_key(
            key,
            format!("key must not end with '{SIDECAR_SUFFIX}'"),
        ));
    }
    Ok(())
}

/// Generic key/value store over a [`Backend`]
#[derive(Debug)]
pub struct CacheStore {
    backend: Arc<dyn Backend>,
    registry: Arc<Registry>,
    readonly: bool,
    on_exists: OnExists,
    locks: KeyLocks,
}

impl CacheStore {
    /// Create a store over `backend`, resolving serializers through `registry`
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<Registry>) -> Self {
        Self {
            backend,
            registry,
            readonly: false,
            on_exists: OnExists::default(),
            locks: KeyLocks::default(),
        }
    }

    /// Store rooted at a local directory with the built-in serializers
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(LocalBackend::new(path)),
            Arc::new(Registry::with_builtins()),
        )
    }

    /// Refuse every mutation
    #[must_use]
    pub const fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Default duplicate-key policy
    #[must_use]
    pub const fn on_exists(mut self, policy: OnExists) -> Self {
        self.on_exists = policy;
        self
    }

    /// Whether the store refuses mutations
    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Underlying backend
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Serializer registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn location<'a>(&'a self, key: &'a str) -> Location<'a> {
        Location::new(self.backend.as_ref(), key)
    }

    fn resolve_serializer(&self, name: Option<&str>, value: &Value) -> Result<Serializer> {
        match name {
            None | Some(AUTO) => self.registry.serializer(&self.registry.pick_serializer(value)),
            Some(name) => self.registry.serializer(name),
        }
    }

    /// Store `value` under `key`
    ///
    /// Returns the committed artifact, or `None` when the skip policy left an
    /// existing value in place.
    pub fn put(&self, key: &str, value: &Value, options: PutOptions) -> Result<Option<Artifact>> {
        if self.readonly {
            return Err(Error::readonly(key, "put"));
        }
        validate_key(key)?;
        let serializer = self.resolve_serializer(options.serializer.as_deref(), value)?;
        let described = serializer.describe(value, &options.dump_options)?;
        let policy = options.on_exists.unwrap_or(self.on_exists);

        let lock = self.locks.get(key);
        let _guard = lock.lock();

        if self.contains(key) {
            match policy {
                OnExists::Raise => {
                    return Err(Error::DuplicateKey {
                        key: key.to_string(),
                    });
                }
                OnExists::Skip => {
                    tracing::debug!(key, "Key exists, skipping put");
                    return Ok(None);
                }
                OnExists::Overwrite => {
                    self.backend.delete(&Artifact::sidecar_path(key))?;
                    self.remove_value(key)?;
                }
            }
        } else if self.value_exists(key) {
            tracing::debug!(key, "Removing uncommitted value before put");
            self.remove_value(key)?;
        }

        if let Err(e) = serializer.dump(value, &self.location(key), &options.dump_options) {
            self.discard_partial(key);
            return Err(e);
        }

        let mut dump_options = options.dump_options;
        dump_options.extend(described);
        let artifact = Artifact {
            dump_options,
            metadata: options.metadata,
            fingerprint: options.fingerprint,
            ..Artifact::new(key, serializer.name())
        };
        let committed = artifact
            .to_json()
            .and_then(|json| self.backend.write(&Artifact::sidecar_path(key), &json));
        if let Err(e) = committed {
            self.discard_partial(key);
            return Err(e);
        }

        tracing::debug!(key, serializer = serializer.name(), "Stored value");
        Ok(Some(artifact))
    }

    /// Load the value stored under `key`
    ///
    /// The recorded dump options are passed to the serializer, overridden by
    /// `load_options`.
    pub fn get(&self, key: &str, load_options: &Options) -> Result<Value> {
        let artifact = self.get_artifact(key)?;
        let serializer = self.registry.serializer(&artifact.serializer)?;
        let mut options = artifact.dump_options;
        options.extend(load_options.iter().map(|(k, v)| (k.clone(), v.clone())));
        tracing::debug!(key, serializer = serializer.name(), "Loading value");
        serializer.load(&self.location(key), &options)
    }

    /// Metadata of the value stored under `key`
    pub fn get_artifact(&self, key: &str) -> Result<Artifact> {
        validate_key(key)?;
        let sidecar = Artifact::sidecar_path(key);
        if !self.backend.exists(&sidecar) {
            return Err(Error::not_found(key));
        }
        Artifact::from_json(&self.backend.read(&sidecar)?)
    }

    /// Load whatever sits at the value location of `key` with an explicit
    /// serializer, committed or not
    pub fn load_with(&self, key: &str, serializer: &str, load_options: &Options) -> Result<Value> {
        validate_key(key)?;
        if !self.value_exists(key) {
            return Err(Error::not_found(key));
        }
        let serializer = self.registry.serializer(serializer)?;
        tracing::debug!(key, serializer = serializer.name(), "Loading uncommitted value");
        serializer.load(&self.location(key), load_options)
    }

    /// Remove `key`; with `dry_run` only check that it could be removed
    pub fn delete(&self, key: &str, dry_run: bool) -> Result<()> {
        if self.readonly {
            return Err(Error::readonly(key, "delete"));
        }
        validate_key(key)?;

        let lock = self.locks.get(key);
        let _guard = lock.lock();

        if !self.contains(key) {
            return Err(Error::not_found(key));
        }
        if dry_run {
            tracing::debug!(key, "Dry run delete");
            return Ok(());
        }

        let sidecar = Artifact::sidecar_path(key);
        let committed = self.backend.read(&sidecar)?;
        self.backend.delete(&sidecar)?;
        if let Err(e) = self.remove_value(key) {
            if let Err(restore) = self.backend.write(&sidecar, &committed) {
                tracing::warn!(key, "Failed to restore artifact after delete error: {restore}");
            }
            return Err(e);
        }
        tracing::debug!(key, "Deleted value");
        Ok(())
    }

    /// Every committed key
    pub fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .backend
            .list("")?
            .into_iter()
            .filter_map(|path| path.strip_suffix(SIDECAR_SUFFIX).map(str::to_string))
            .collect())
    }

    /// Whether `key` holds a committed value; never fails
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.backend.exists(&Artifact::sidecar_path(key))
    }

    /// Whether anything exists at the value location of `key`
    #[must_use]
    pub fn value_exists(&self, key: &str) -> bool {
        self.backend.exists(key)
    }

    /// Whether the value of `key` is a directory tree
    #[must_use]
    pub fn is_tree(&self, key: &str) -> bool {
        self.backend.is_dir(key)
    }

    /// Remove the value location of `key`, file or tree, if present
    pub(crate) fn remove_value(&self, key: &str) -> Result<()> {
        if self.backend.is_dir(key) {
            self.backend.delete_tree(key)
        } else if self.backend.exists(key) {
            self.backend.delete(key)
        } else {
            Ok(())
        }
    }

    fn discard_partial(&self, key: &str) {
        if let Err(e) = self.remove_value(key) {
            tracing::warn!(key, "Failed to remove partially written value: {e}");
        }
    }
}
