//! Persisted computations
//!
//! [`Persist`] wraps a [`Callable`] so that calling it either reads a value
//! previously written to the cache directory or runs the computation and
//! writes the result. The choice is made by the [`DecisionEngine`] shared
//! through the [`Cache`] context.
//!
//! ```no_run
//! use memento_cache::{Cache, Format, Kwargs, Param, Persist, Value};
//!
//! let compute = memento_cache::function!(compute)
//!     .with_source("v1")
//!     .with_param(Param::required("scale"))
//!     .with_body(|args| Ok(Value::from(serde_json::json!(args.get::<i64>("scale")? * 2))));
//!
//! let cache = Cache::new("/tmp/memento");
//! let persisted = Persist::new(compute)
//!     .name("doubled")
//!     .format(Format::Json)
//!     .build(&cache)?;
//! let first = persisted.call(&[serde_json::json!(10)], &Kwargs::new())?;
//! println!("{}: {}", first.path.display(), first.action);
//! # Ok::<(), memento_cache::Error>(())
//! ```

use crate::artifact::Artifact;
use crate::backend::LocalBackend;
use crate::decision::{CacheAction, CacheState, DecisionEngine, DecisionPolicy, FirstUse};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::identity::{Callable, Kwargs};
use crate::registry::{Options, Registry};
use crate::settings::Settings;
use crate::store::{CacheStore, KeyLocks, OnExists, PutOptions};
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Storage format of a persisted computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    /// MessagePack of any value
    Generic,
    /// JSON of object values
    Json,
    /// CSV of tables
    Csv,
    /// Arrow IPC file of tables
    Arrow,
    /// Single-file dataset
    Dataset,
    /// Directory-tree dataset
    DatasetTree,
}

impl Format {
    /// Every format, in declaration order
    pub const ALL: [Self; 6] = [
        Self::Generic,
        Self::Json,
        Self::Csv,
        Self::Arrow,
        Self::Dataset,
        Self::DatasetTree,
    ];

    /// Name accepted by [`Format::from_str`]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Arrow => "arrow",
            Self::Dataset => "dataset",
            Self::DatasetTree => "dataset-tree",
        }
    }

    /// File extension appended to persisted names
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Generic => "msgpack",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Arrow => "arrow",
            Self::Dataset => "dataset",
            Self::DatasetTree => "dstree",
        }
    }

    /// Serializer writing this format
    #[must_use]
    pub const fn serializer(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Json => "json",
            Self::Csv => "table.csv",
            Self::Arrow => "table.arrow",
            Self::Dataset => "dataset.file",
            Self::DatasetTree => "dataset.tree",
        }
    }

    /// Whether values are stored as a directory tree
    #[must_use]
    pub const fn is_tree(self) -> bool {
        matches!(self, Self::DatasetTree)
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Error::InvalidFormat {
                format: s.to_string(),
            })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared context for persisted computations
///
/// Cloning is cheap; clones share the registry, the decision history, the
/// per-path locks and the cache directory.
#[derive(Debug, Clone)]
pub struct Cache {
    registry: Arc<Registry>,
    engine: Arc<DecisionEngine>,
    cache_dir: Arc<RwLock<PathBuf>>,
    locks: Arc<KeyLocks>,
    settings: Arc<Settings>,
}

impl Cache {
    /// Cache rooted at `cache_dir` with default settings
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_parts(
            cache_dir,
            Arc::new(Registry::with_builtins()),
            Arc::new(DecisionEngine::new()),
        )
    }

    /// Cache sharing an existing registry and decision engine
    #[must_use]
    pub fn with_parts(
        cache_dir: impl Into<PathBuf>,
        registry: Arc<Registry>,
        engine: Arc<DecisionEngine>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            registry,
            engine,
            cache_dir: Arc::new(RwLock::new(cache_dir.clone())),
            locks: Arc::new(KeyLocks::default()),
            settings: Arc::new(Settings {
                cache_dir: Some(cache_dir),
                ..Settings::default()
            }),
        }
    }

    /// Cache configured from settings
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let cache_dir = settings.resolved_cache_dir()?;
        let mut cache = Self::new(cache_dir);
        cache.settings = Arc::new(settings);
        Ok(cache)
    }

    /// Current cache directory
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.read().clone()
    }

    /// Change the cache directory; affects every clone of this context
    pub fn set_cache_dir(&self, cache_dir: impl Into<PathBuf>) {
        let cache_dir = cache_dir.into();
        tracing::debug!(path = %cache_dir.display(), "Cache directory changed");
        *self.cache_dir.write() = cache_dir;
    }

    /// Serializer registry
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decision engine
    #[must_use]
    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    /// Settings persisted computations fall back to
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A store over `dir` using this context's registry
    #[must_use]
    pub fn store_at(&self, dir: &Path) -> CacheStore {
        CacheStore::new(
            Arc::new(LocalBackend::new(dir)),
            Arc::clone(&self.registry),
        )
        .on_exists(self.settings.on_exists)
    }

    /// A store over the current cache directory
    #[must_use]
    pub fn store(&self) -> CacheStore {
        self.store_at(&self.cache_dir())
    }
}

/// Builder for a [`PersistedComputation`]
///
/// Unset knobs fall back to the [`Settings`] of the cache it is built against.
#[derive(Debug, Clone)]
pub struct Persist {
    callable: Callable,
    name: Option<String>,
    path: Option<PathBuf>,
    trust_cache: Option<bool>,
    clobber: Option<bool>,
    format: Option<Format>,
    first_use: Option<FirstUse>,
    load_options: Options,
    dump_options: Options,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Persist {
    /// Start persisting `callable`
    #[must_use]
    pub fn new(callable: impl Into<Callable>) -> Self {
        Self {
            callable: callable.into(),
            name: None,
            path: None,
            trust_cache: None,
            clobber: None,
            format: None,
            first_use: None,
            load_options: Options::new(),
            dump_options: Options::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Base name of the cached value; defaults to one derived from the fingerprint
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Directory holding the cached value; defaults to the cache directory
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Read known values without comparing fingerprints
    #[must_use]
    pub const fn trust_cache(mut self, trust_cache: bool) -> Self {
        self.trust_cache = Some(trust_cache);
        self
    }

    /// Always recompute known values
    #[must_use]
    pub const fn clobber(mut self, clobber: bool) -> Self {
        self.clobber = Some(clobber);
        self
    }

    /// Storage format
    #[must_use]
    pub const fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Treatment of values found on first sight
    #[must_use]
    pub const fn first_use(mut self, first_use: FirstUse) -> Self {
        self.first_use = Some(first_use);
        self
    }

    /// Options for loading cached values
    #[must_use]
    pub fn load_options(mut self, options: Options) -> Self {
        self.load_options = options;
        self
    }

    /// Options for writing values
    #[must_use]
    pub fn dump_options(mut self, options: Options) -> Self {
        self.dump_options = options;
        self
    }

    /// Metadata recorded in every artifact written
    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Bind to `cache`; fails if the function has no body
    pub fn build(self, cache: &Cache) -> Result<PersistedComputation> {
        let function = self.callable.function();
        if !function.is_callable() {
            return Err(Error::NotCallable {
                name: function.qualified_name().to_string(),
            });
        }
        let settings = cache.settings();
        Ok(PersistedComputation {
            callable: self.callable,
            name: self.name,
            path: self.path,
            policy: DecisionPolicy {
                trust_cache: self.trust_cache.unwrap_or(settings.trust_cache),
                clobber: self.clobber.unwrap_or(settings.clobber),
                first_use: self.first_use.unwrap_or(settings.first_use),
            },
            format: self.format.unwrap_or(settings.format),
            load_options: self.load_options,
            dump_options: self.dump_options,
            metadata: self.metadata,
            cache: cache.clone(),
        })
    }
}

/// Outcome of calling a persisted computation
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    /// Computed or loaded value
    pub value: Value,
    /// What the decision engine chose
    pub action: CacheAction,
    /// Store key, relative to the cache directory
    pub key: String,
    /// Full path of the value
    pub path: PathBuf,
    /// Fingerprint of this call
    pub fingerprint: Fingerprint,
}

/// A computation whose results are cached on disk
#[derive(Debug, Clone)]
pub struct PersistedComputation {
    callable: Callable,
    name: Option<String>,
    path: Option<PathBuf>,
    policy: DecisionPolicy,
    format: Format,
    load_options: Options,
    dump_options: Options,
    metadata: BTreeMap<String, serde_json::Value>,
    cache: Cache,
}

impl PersistedComputation {
    /// Storage format
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Decision policy
    #[must_use]
    pub const fn policy(&self) -> DecisionPolicy {
        self.policy
    }

    /// Store key for a call with the given fingerprint
    fn basename(&self, fingerprint: &Fingerprint) -> String {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("persisted-{}", fingerprint.short()));
        let suffix = format!(".{}", self.format.extension());
        if name.ends_with(&suffix) {
            name
        } else {
            format!("{name}{suffix}")
        }
    }

    /// Read the cached value or compute and write it
    pub fn call(&self, args: &[serde_json::Value], kwargs: &Kwargs) -> Result<Persisted> {
        let identity = self.callable.identity()?;
        let fingerprint = fingerprint(&identity, args, kwargs)?;
        let key = self.basename(&fingerprint);
        let dir = self.path.clone().unwrap_or_else(|| self.cache.cache_dir());
        let path = dir.join(&key);
        let history_key = path.display().to_string();

        let lock = self.cache.locks.get(&history_key);
        let _guard = lock.lock();

        let store = self.cache.store_at(&dir);
        let exists = store.value_exists(&key);
        let recorded = if exists && self.policy.first_use == FirstUse::VerifyRecorded {
            match store.get_artifact(&key) {
                Ok(artifact) => artifact.fingerprint,
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let decision = self.cache.engine.evaluate(
            &history_key,
            &fingerprint,
            exists,
            self.policy,
            recorded.as_ref(),
        );
        let path_display = path.display();

        match decision.action {
            CacheAction::ReadTrusted | CacheAction::ReadVerified => {
                if decision.action == CacheAction::ReadTrusted {
                    let reason = if decision.state == CacheState::CacheFileUnknownFingerprint {
                        "first sight"
                    } else {
                        "trust_cache"
                    };
                    tracing::info!(path = %path_display, reason, "Assuming cache is correct");
                }
                tracing::info!(
                    path = %path_display,
                    action = %decision.action,
                    "Reading cached value"
                );
                let value = if store.contains(&key) {
                    store.get(&key, &self.load_options)?
                } else {
                    store.load_with(&key, self.format.serializer(), &self.load_options)?
                };
                return Ok(Persisted {
                    value,
                    action: decision.action,
                    key,
                    path,
                    fingerprint,
                });
            }
            CacheAction::Create => {
                if !store.backend().is_dir("") {
                    tracing::info!(path = %dir.display(), "Creating cache directory");
                    store.backend().create_dir_all("")?;
                }
            }
            CacheAction::Overwrite => {
                tracing::info!(path = %path_display, "Fingerprint mismatch, removing");
                let sidecar = Artifact::sidecar_path(&key);
                if store.backend().exists(&sidecar) {
                    store.backend().delete(&sidecar)?;
                }
                store.remove_value(&key)?;
            }
        }

        let value = self.callable.call(args, kwargs)?;
        tracing::info!(path = %path_display, action = %decision.action, "Writing cached value");
        let options = PutOptions {
            serializer: Some(self.format.serializer().to_string()),
            on_exists: Some(OnExists::Overwrite),
            dump_options: self.dump_options.clone(),
            metadata: self.metadata.clone(),
            fingerprint: Some(fingerprint.clone()),
        };
        store.put(&key, &value, options)?;

        Ok(Persisted {
            value,
            action: decision.action,
            key,
            path,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Param;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn counting(counter: Arc<AtomicUsize>) -> crate::Function {
        crate::function!(double)
            .with_source("double v1")
            .with_param(Param::required("x"))
            .with_body(move |args| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(json!(args.get::<i64>("x")? * 2)))
            })
    }

    #[test]
    fn test_format_parsing() {
        for format in Format::ALL {
            assert_eq!(format.as_str().parse::<Format>().unwrap(), format);
        }
        assert!(matches!(
            "nc".parse::<Format>(),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(Format::DatasetTree.is_tree());
        assert!(!Format::Csv.is_tree());
    }

    #[test]
    fn test_build_requires_body() {
        let cache = Cache::new("/unused");
        let result = Persist::new(crate::function!(declared)).build(&cache);
        assert!(matches!(result, Err(Error::NotCallable { .. })));
    }

    #[test]
    fn test_build_uses_cache_settings() {
        let settings = Settings {
            cache_dir: Some(PathBuf::from("/unused")),
            trust_cache: true,
            format: Format::Json,
            ..Settings::default()
        };
        let cache = Cache::from_settings(settings).unwrap();
        let persisted = Persist::new(counting(Arc::default()))
            .clobber(true)
            .build(&cache)
            .unwrap();
        assert_eq!(persisted.format(), Format::Json);
        assert!(persisted.policy().trust_cache);
        assert!(persisted.policy().clobber);
    }

    #[test]
    fn test_basename_suffixing() {
        let cache = Cache::new("/unused");
        let fp = Fingerprint::from_hex(&"ab".repeat(32)).unwrap();

        let named = Persist::new(counting(Arc::default()))
            .name("foo")
            .format(Format::Json)
            .build(&cache)
            .unwrap();
        assert_eq!(named.basename(&fp), "foo.json");

        let suffixed = Persist::new(counting(Arc::default()))
            .name("foo.json")
            .format(Format::Json)
            .build(&cache)
            .unwrap();
        assert_eq!(suffixed.basename(&fp), "foo.json");

        let derived = Persist::new(counting(Arc::default()))
            .format(Format::Generic)
            .build(&cache)
            .unwrap();
        assert_eq!(derived.basename(&fp), format!("persisted-{}.msgpack", fp.short()));
    }

    #[test]
    fn test_create_then_verified_read() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path().join("nested/cache"));
        let calls = Arc::new(AtomicUsize::new(0));
        let persisted = Persist::new(counting(Arc::clone(&calls)))
            .name("double")
            .format(Format::Json)
            .build(&cache)
            .unwrap();

        let first = persisted.call(&[json!(4)], &Kwargs::new()).unwrap();
        assert_eq!(first.action, CacheAction::Create);
        assert_eq!(first.value, Value::from(json!(8)));
        assert!(first.path.is_file());
        assert!(tmp
            .path()
            .join("nested/cache/double.json.artifact.json")
            .is_file());

        let second = persisted.call(&[json!(4)], &Kwargs::new()).unwrap();
        assert_eq!(second.action, CacheAction::ReadVerified);
        assert_eq!(second.value, Value::from(json!(8)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_arguments_overwrite() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let persisted = Persist::new(counting(Arc::clone(&calls)))
            .name("double")
            .format(Format::Generic)
            .build(&cache)
            .unwrap();

        persisted.call(&[json!(1)], &Kwargs::new()).unwrap();
        let changed = persisted.call(&[json!(2)], &Kwargs::new()).unwrap();
        assert_eq!(changed.action, CacheAction::Overwrite);
        assert_eq!(changed.value, Value::from(json!(4)));

        let artifact = cache.store().get_artifact(&changed.key).unwrap();
        assert_eq!(artifact.fingerprint, Some(changed.fingerprint));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_cache_dir_redirects_writes() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::new(tmp.path().join("a"));
        let persisted = Persist::new(counting(Arc::default()))
            .name("double")
            .format(Format::Json)
            .build(&cache)
            .unwrap();

        cache.set_cache_dir(tmp.path().join("b"));
        let result = persisted.call(&[json!(3)], &Kwargs::new()).unwrap();
        assert_eq!(result.path, tmp.path().join("b/double.json"));
        assert!(result.path.is_file());
    }

    #[test]
    fn test_verify_recorded_detects_stale_value() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let writer = Cache::new(tmp.path());
        Persist::new(counting(Arc::clone(&calls)))
            .name("double")
            .format(Format::Json)
            .build(&writer)
            .unwrap()
            .call(&[json!(1)], &Kwargs::new())
            .unwrap();

        // Fresh history, as in a new process
        let reader = Cache::new(tmp.path());
        let result = Persist::new(counting(Arc::clone(&calls)))
            .name("double")
            .format(Format::Json)
            .first_use(FirstUse::VerifyRecorded)
            .build(&reader)
            .unwrap()
            .call(&[json!(5)], &Kwargs::new())
            .unwrap();
        assert_eq!(result.action, CacheAction::Overwrite);
        assert_eq!(result.value, Value::from(json!(10)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
