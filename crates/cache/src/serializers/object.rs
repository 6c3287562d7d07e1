//! Generic object encodings

use super::bool_option;
use crate::backend::Location;
use crate::registry::{Options, Serializer};
use crate::value::Value;
use crate::{Error, Result};

/// MessagePack encoding of any [`Value`]; the default fallback
#[must_use]
pub fn generic() -> Serializer {
    Serializer::new("generic", dump_generic, load_generic)
}

/// JSON encoding of object values
///
/// Options: `pretty` (dump, default `true`).
#[must_use]
pub fn json() -> Serializer {
    Serializer::new("json", dump_json, load_json)
}

fn dump_generic(value: &Value, destination: &Location<'_>, _options: &Options) -> Result<()> {
    let bytes = rmp_serde::to_vec_named(value)
        .map_err(|e| Error::serialization(format!("Failed to encode value: {e}")))?;
    destination.write(&bytes)
}

fn load_generic(source: &Location<'_>, _options: &Options) -> Result<Value> {
    let bytes = source.read()?;
    rmp_serde::from_slice(&bytes).map_err(|e| {
        Error::serialization(format!(
            "Failed to decode value from {}: {e}",
            source.backend().describe(source.path())
        ))
    })
}

fn dump_json(value: &Value, destination: &Location<'_>, options: &Options) -> Result<()> {
    let Value::Object(object) = value else {
        return Err(Error::unsupported("json", value.kind()));
    };
    let bytes = if bool_option(options, "pretty", true)? {
        serde_json::to_vec_pretty(object)
    } else {
        serde_json::to_vec(object)
    }
    .map_err(|e| Error::serialization(format!("Failed to encode JSON: {e}")))?;
    destination.write(&bytes)
}

fn load_json(source: &Location<'_>, _options: &Options) -> Result<Value> {
    let bytes = source.read()?;
    serde_json::from_slice(&bytes)
        .map(Value::Object)
        .map_err(|e| Error::serialization(format!("Failed to parse JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::value::{Column, ColumnData, Table};
    use serde_json::json;

    #[test]
    fn test_generic_roundtrips_any_value() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "v");
        let table = Table::new(vec![Column::new("a", ColumnData::Int(vec![1, -2]))]).unwrap();

        for value in [
            Value::from("my_data"),
            Value::Object(json!([1, 3, 4])),
            Value::Object(json!({"nested": {"x": 1.5, "y": null}})),
            Value::Table(table),
        ] {
            generic().dump(&value, &loc, &Options::new()).unwrap();
            assert_eq!(generic().load(&loc, &Options::new()).unwrap(), value);
        }
    }

    #[test]
    fn test_json_compact_option() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "v.json");
        let mut opts = Options::new();
        opts.insert("pretty".into(), json!(false));

        json().dump(&Value::Object(json!({"a": 1})), &loc, &opts).unwrap();
        assert_eq!(loc.read().unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn test_json_rejects_tables() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "v.json");
        let err = json()
            .dump(&Value::Table(Table::default()), &loc, &Options::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_generic_load_corrupt() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "v");
        loc.write(b"\xc1\xc1").unwrap();
        assert!(matches!(
            generic().load(&loc, &Options::new()),
            Err(Error::Serialization { .. })
        ));
    }
}
