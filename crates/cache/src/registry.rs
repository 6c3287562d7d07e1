//! Serializer registry
//!
//! A registry maps `(namespace, name)` pairs to serializer factories. The
//! built-in `"serializers"` namespace holds every encoding the cache store can
//! use; further namespaces can be created for plugins.
//!
//! Automatic selection walks an ordered list of `(predicate, serializer)`
//! rules and returns the first match, falling back to the generic encoding.

use crate::backend::Location;
use crate::value::Value;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Namespace holding the serializers used by the cache store
pub const SERIALIZERS: &str = "serializers";

/// Serializer used when no selection rule matches
pub const GENERIC: &str = "generic";

/// Serializer id that asks the store to pick one from the value
pub const AUTO: &str = "auto";

/// Keyword options passed to `dump` and `load`
pub type Options = BTreeMap<String, serde_json::Value>;

type DumpFn = dyn Fn(&Value, &Location<'_>, &Options) -> Result<()> + Send + Sync;
type LoadFn = dyn Fn(&Location<'_>, &Options) -> Result<Value> + Send + Sync;
type DescribeFn = dyn Fn(&Value, &Options) -> Result<Options> + Send + Sync;
type Factory = dyn Fn() -> Serializer + Send + Sync;
type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

/// A named pair of encode/decode functions
#[derive(Clone)]
pub struct Serializer {
    name: String,
    dump: Arc<DumpFn>,
    load: Arc<LoadFn>,
    describe: Option<Arc<DescribeFn>>,
}

impl Serializer {
    /// Create a serializer from its dump and load functions
    pub fn new<D, L>(name: impl Into<String>, dump: D, load: L) -> Self
    where
        D: Fn(&Value, &Location<'_>, &Options) -> Result<()> + Send + Sync + 'static,
        L: Fn(&Location<'_>, &Options) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dump: Arc::new(dump),
            load: Arc::new(load),
            describe: None,
        }
    }

    /// Attach a function producing options to record alongside a dumped value
    ///
    /// The recorded options are merged into the artifact's dump options and
    /// handed back to `load` when the value is read through the store.
    #[must_use]
    pub fn with_describe<F>(mut self, describe: F) -> Self
    where
        F: Fn(&Value, &Options) -> Result<Options> + Send + Sync + 'static,
    {
        self.describe = Some(Arc::new(describe));
        self
    }

    /// Serializer name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode `value` into `destination`
    pub fn dump(&self, value: &Value, destination: &Location<'_>, options: &Options) -> Result<()> {
        (self.dump)(value, destination, options)
    }

    /// Options to record for `value`; empty unless a describe function is attached
    pub fn describe(&self, value: &Value, options: &Options) -> Result<Options> {
        self.describe
            .as_ref()
            .map_or_else(|| Ok(Options::new()), |describe| describe(value, options))
    }

    /// Decode a value from `source`
    pub fn load(&self, source: &Location<'_>, options: &Options) -> Result<Value> {
        (self.load)(source, options)
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct Rule {
    serializer: String,
    predicate: Arc<Predicate>,
}

/// Registry of serializer factories grouped in namespaces
pub struct Registry {
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, Arc<Factory>>>>,
    rules: RwLock<Vec<Rule>>,
}

impl Registry {
    /// A registry with an empty `"serializers"` namespace and no rules
    #[must_use]
    pub fn empty() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(SERIALIZERS.to_string(), BTreeMap::new());
        Self {
            namespaces: RwLock::new(namespaces),
            rules: RwLock::new(Vec::new()),
        }
    }

    /// A registry preloaded with the built-in serializers and selection rules
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        crate::serializers::install(&registry);
        registry
    }

    /// Create a new namespace
    pub fn create_namespace(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(namespace) {
            return Err(Error::NamespaceExists {
                namespace: namespace.to_string(),
            });
        }
        namespaces.insert(namespace.to_string(), BTreeMap::new());
        Ok(())
    }

    /// Register a serializer factory under `namespace`/`name`
    pub fn register<F>(&self, namespace: &str, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Serializer + Send + Sync + 'static,
    {
        let mut namespaces = self.namespaces.write();
        let entries = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::UnknownNamespace {
                namespace: namespace.to_string(),
            })?;
        if entries.contains_key(name) {
            return Err(Error::SerializerExists {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        entries.insert(name.to_string(), Arc::new(factory));
        tracing::debug!(namespace, name, "Registered serializer");
        Ok(())
    }

    /// Look up a serializer
    pub fn get(&self, namespace: &str, name: &str) -> Result<Serializer> {
        let factory = {
            let namespaces = self.namespaces.read();
            let entries = namespaces
                .get(namespace)
                .ok_or_else(|| Error::UnknownNamespace {
                    namespace: namespace.to_string(),
                })?;
            entries
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownSerializer {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })?
        };
        Ok(factory())
    }

    /// Look up a serializer in the `"serializers"` namespace
    pub fn serializer(&self, name: &str) -> Result<Serializer> {
        self.get(SERIALIZERS, name)
    }

    /// Whether `namespace`/`name` is registered; never fails
    #[must_use]
    pub fn has(&self, namespace: &str, name: &str) -> bool {
        self.namespaces
            .read()
            .get(namespace)
            .is_some_and(|entries| entries.contains_key(name))
    }

    /// All namespace names
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.read().keys().cloned().collect()
    }

    /// Serializer names registered in `namespace`
    pub fn names(&self, namespace: &str) -> Result<Vec<String>> {
        self.namespaces
            .read()
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .ok_or_else(|| Error::UnknownNamespace {
                namespace: namespace.to_string(),
            })
    }

    /// Append a selection rule; rules are evaluated in the order they were added
    pub fn add_rule<P>(&self, serializer: &str, predicate: P) -> Result<()>
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        if !self.has(SERIALIZERS, serializer) {
            return Err(Error::UnknownSerializer {
                namespace: SERIALIZERS.to_string(),
                name: serializer.to_string(),
            });
        }
        self.rules.write().push(Rule {
            serializer: serializer.to_string(),
            predicate: Arc::new(predicate),
        });
        Ok(())
    }

    /// Pick a serializer name for `value`
    #[must_use]
    pub fn pick_serializer(&self, value: &Value) -> String {
        self.rules
            .read()
            .iter()
            .find(|rule| (rule.predicate)(value))
            .map_or_else(|| GENERIC.to_string(), |rule| rule.serializer.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let namespaces = self.namespaces.read();
        let mut map = f.debug_map();
        for (namespace, entries) in namespaces.iter() {
            map.entry(namespace, &entries.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
