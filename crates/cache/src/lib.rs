//! Disk-backed, content-aware caching for expensive computations
//!
//! This crate decides whether the stored result of a deterministic
//! computation can be reused, and reads or writes it:
//! - Deterministic fingerprints of a computation's identity and arguments
//! - An in-process decision engine mapping fingerprints to cache actions
//! - A key/value store with a pluggable serializer registry
//!
//! # Overview
//!
//! A [`PersistedComputation`] wraps a [`Callable`]. Each call computes a
//! [`Fingerprint`] from the callable's [`Identity`] and arguments, asks the
//! [`DecisionEngine`] what to do, and then either loads the stored value
//! through the [`CacheStore`] or runs the computation and stores its result.
//!
//! # Storage layout
//!
//! Every key maps to a value location (a file or a directory tree) and a
//! JSON sidecar `{key}.artifact.json` recording the [`Artifact`]: the
//! serializer used, its options, the fingerprint and a timestamp.

// TODO(cache-docs): Add # Errors documentation to all fallible public functions
#![expect(
    clippy::missing_errors_doc,
    reason = "Error documentation to be added incrementally"
)]

pub mod artifact;
pub mod backend;
pub mod decision;
mod error;
pub mod fingerprint;
pub mod identity;
pub mod persist;
pub mod registry;
pub mod serializers;
pub mod settings;
pub mod store;
pub mod value;

// Re-export error types at crate root
pub use error::{BoxError, Error, Result};

// Re-export main types
pub use artifact::Artifact;
pub use backend::{Backend, LocalBackend, Location, MemoryBackend};
pub use decision::{CacheAction, CacheState, Decision, DecisionEngine, DecisionPolicy, FirstUse};
pub use fingerprint::{Fingerprint, fingerprint};
pub use identity::{Arguments, Callable, Function, Identity, Kwargs, Param};
pub use persist::{Cache, Format, Persist, Persisted, PersistedComputation};
pub use registry::{Options, Registry, Serializer};
pub use settings::Settings;
pub use store::{CacheStore, OnExists, PutOptions};
pub use value::{Column, ColumnData, Dataset, Table, Value, Variable};
