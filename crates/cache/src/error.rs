//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Boxed error returned by user computations and serializer plugins
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Identity extraction or invocation of something that has no body
    #[error("'{name}' is not callable")]
    #[diagnostic(
        code(memento::identity::not_callable),
        help("Declare the function with a body before persisting it")
    )]
    NotCallable {
        /// Qualified name of the declared function
        name: String,
    },

    /// Arguments do not fit the function signature
    #[error("Invalid arguments for '{name}': {message}")]
    #[diagnostic(code(memento::identity::arguments))]
    InvalidArguments {
        /// Qualified name of the function
        name: String,
        /// What was wrong with the arguments
        message: String,
    },

    /// The computation itself failed
    #[error("Computation '{name}' failed")]
    #[diagnostic(code(memento::computation))]
    Computation {
        /// Qualified name of the function
        name: String,
        /// Error raised by the computation body
        #[source]
        source: BoxError,
    },

    /// Serializer name missing from a namespace
    #[error("Unknown serializer '{name}' in namespace '{namespace}'")]
    #[diagnostic(
        code(memento::registry::unknown_serializer),
        help("Register the serializer before referring to it")
    )]
    UnknownSerializer {
        /// Namespace that was searched
        namespace: String,
        /// Serializer name that was not found
        name: String,
    },

    /// Registry namespace does not exist
    #[error("Unknown registry namespace '{namespace}'")]
    #[diagnostic(code(memento::registry::unknown_namespace))]
    UnknownNamespace {
        /// Namespace that was not found
        namespace: String,
    },

    /// Registry namespace already exists
    #[error("Registry namespace '{namespace}' already exists")]
    #[diagnostic(code(memento::registry::namespace_exists))]
    NamespaceExists {
        /// Namespace that already exists
        namespace: String,
    },

    /// Serializer name already registered in the namespace
    #[error("Serializer '{name}' is already registered in namespace '{namespace}'")]
    #[diagnostic(code(memento::registry::serializer_exists))]
    SerializerExists {
        /// Namespace holding the existing entry
        namespace: String,
        /// Duplicate serializer name
        name: String,
    },

    /// `put` on an existing key under the raise policy
    #[error("Cache key already exists: {key}")]
    #[diagnostic(
        code(memento::store::duplicate_key),
        help("Use the overwrite or skip policy to replace or keep the existing value")
    )]
    DuplicateKey {
        /// The key that already holds a committed artifact
        key: String,
    },

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    #[diagnostic(
        code(memento::store::not_found),
        help("The cache entry may have been deleted or never existed")
    )]
    KeyNotFound {
        /// The cache key that was not found
        key: String,
    },

    /// Mutation attempted on a read-only store
    #[error("Cannot {operation} '{key}': store is read-only")]
    #[diagnostic(code(memento::store::readonly))]
    ReadOnlyStore {
        /// Key the mutation targeted
        key: String,
        /// Operation that was refused (e.g., "put", "delete")
        operation: String,
    },

    /// Key cannot be mapped to a storage location
    #[error("Invalid cache key '{key}': {reason}")]
    #[diagnostic(code(memento::store::invalid_key))]
    InvalidKey {
        /// The rejected key
        key: String,
        /// Why the key was rejected
        reason: String,
    },

    /// I/O error during storage operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(memento::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create_dir_all")
        operation: String,
    },

    /// Unknown storage format
    #[error("Unknown storage format: {format}")]
    #[diagnostic(
        code(memento::persist::invalid_format),
        help("Supported formats: generic, json, csv, arrow, dataset, dataset-tree")
    )]
    InvalidFormat {
        /// The requested format
        format: String,
    },

    /// Serializer asked to encode a value kind it does not handle
    #[error("Serializer '{serializer}' cannot encode a {found} value")]
    #[diagnostic(code(memento::serializer::unsupported_value))]
    UnsupportedValue {
        /// Serializer that refused the value
        serializer: String,
        /// Kind of value that was given
        found: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(memento::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(memento::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a not found error
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an invalid key error
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid arguments error
    #[must_use]
    pub fn invalid_arguments(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a read-only store error
    #[must_use]
    pub fn readonly(key: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::ReadOnlyStore {
            key: key.into(),
            operation: operation.into(),
        }
    }

    /// Create an unsupported value error
    #[must_use]
    pub fn unsupported(serializer: impl Into<String>, found: impl Into<String>) -> Self {
        Self::UnsupportedValue {
            serializer: serializer.into(),
            found: found.into(),
        }
    }

    /// Whether this error is a missing-key error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
