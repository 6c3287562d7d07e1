//! Built-in serializers
//!
//! | Name           | Values   | Layout                                     |
//! |----------------|----------|--------------------------------------------|
//! | `generic`      | any      | single MessagePack file                    |
//! | `json`         | objects  | single JSON file                           |
//! | `table.csv`    | tables   | single CSV file                            |
//! | `table.arrow`  | tables   | single Arrow IPC file                      |
//! | `dataset.file` | datasets | single MessagePack file                    |
//! | `dataset.tree` | datasets | directory: metadata + one chunk per variable |

mod dataset;
mod object;
mod tabular;

use crate::registry::{Options, Registry, SERIALIZERS, Serializer};
use crate::value::Value;
use crate::{Error, Result};

pub use dataset::{dataset_file, dataset_tree};
pub use object::{generic, json};
pub use tabular::{table_arrow, table_csv};

type Builtin = (&'static str, fn() -> Serializer);

const BUILTINS: [Builtin; 6] = [
    ("generic", generic),
    ("json", json),
    ("table.csv", table_csv),
    ("table.arrow", table_arrow),
    ("dataset.file", dataset_file),
    ("dataset.tree", dataset_tree),
];

/// Register the built-in serializers and their selection rules
pub(crate) fn install(registry: &Registry) {
    for (name, factory) in BUILTINS {
        if let Err(e) = registry.register(SERIALIZERS, name, factory) {
            tracing::warn!(name, "Skipping built-in serializer: {e}");
        }
    }
    let rules: [(&str, fn(&Value) -> bool); 2] = [
        ("dataset.file", |v| matches!(v, Value::Dataset(_))),
        ("table.csv", |v| matches!(v, Value::Table(_))),
    ];
    for (name, predicate) in rules {
        if let Err(e) = registry.add_rule(name, predicate) {
            tracing::warn!(name, "Skipping built-in selection rule: {e}");
        }
    }
}

/// Read a boolean option
pub(crate) fn bool_option(options: &Options, key: &str, default: bool) -> Result<bool> {
    match options.get(key) {
        None => Ok(default),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(Error::serialization(format!(
            "Option '{key}' must be a boolean, got {other}"
        ))),
    }
}

/// Read a single-byte character option such as a delimiter
pub(crate) fn byte_option(options: &Options, key: &str, default: u8) -> Result<u8> {
    match options.get(key) {
        None => Ok(default),
        Some(serde_json::Value::String(s)) if s.len() == 1 => Ok(s.as_bytes()[0]),
        Some(other) => Err(Error::serialization(format!(
            "Option '{key}' must be a single ASCII character, got {other}"
        ))),
    }
}

/// Read a list-of-strings option
pub(crate) fn names_option(options: &Options, key: &str) -> Result<Option<Vec<String>>> {
    match options.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            Error::serialization(format!("Option '{key}' must be a list of names: {e}"))
        }),
    }
}
