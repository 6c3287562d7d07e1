//! Tabular encodings backed by Apache Arrow

use super::{bool_option, byte_option};
use crate::backend::Location;
use crate::registry::{Options, Serializer};
use crate::value::{Column, ColumnData, Table, Value};
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::io::Cursor;
use std::sync::Arc;

/// Option holding `[name, type]` pairs for every CSV column
const COLUMNS: &str = "columns";

/// CSV encoding of tables
///
/// Options: `delimiter` (single character, default `,`), `header`
/// (default `true`), `columns` (`[name, type]` pairs). The column list is
/// recorded on dump; without it, column types are inferred on load.
#[must_use]
pub fn table_csv() -> Serializer {
    Serializer::new("table.csv", dump_csv, load_csv).with_describe(describe_csv)
}

/// Arrow IPC file encoding of tables; column types are preserved exactly
#[must_use]
pub fn table_arrow() -> Serializer {
    Serializer::new("table.arrow", dump_arrow, load_arrow)
}

fn arrow_error(context: &str) -> impl Fn(ArrowError) -> Error + '_ {
    move |e| Error::serialization(format!("{context}: {e}"))
}

fn expect_table<'v>(serializer: &str, value: &'v Value) -> Result<&'v Table> {
    value
        .as_table()
        .ok_or_else(|| Error::unsupported(serializer, value.kind()))
}

fn dump_csv(value: &Value, destination: &Location<'_>, options: &Options) -> Result<()> {
    let table = expect_table("table.csv", value)?;
    let batch = to_record_batch(table)?;
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(bool_option(options, "header", true)?)
        .with_delimiter(byte_option(options, "delimiter", b',')?)
        .build(Vec::new());
    writer
        .write(&batch)
        .map_err(arrow_error("Failed to write CSV"))?;
    destination.write(&writer.into_inner())
}

fn describe_csv(value: &Value, _options: &Options) -> Result<Options> {
    let table = expect_table("table.csv", value)?;
    let columns: Vec<(&str, &str)> = table
        .columns()
        .iter()
        .map(|c| (c.name.as_str(), type_name(&c.data)))
        .collect();
    let mut recorded = Options::new();
    recorded.insert(COLUMNS.to_string(), serde_json::json!(columns));
    Ok(recorded)
}

const fn type_name(data: &ColumnData) -> &'static str {
    match data {
        ColumnData::Int(_) => "int",
        ColumnData::Float(_) => "float",
        ColumnData::Text(_) => "text",
        ColumnData::Bool(_) => "bool",
    }
}

/// Schema from a recorded column list
fn recorded_schema(options: &Options) -> Result<Option<Schema>> {
    let Some(recorded) = options.get(COLUMNS) else {
        return Ok(None);
    };
    let columns: Vec<(String, String)> = serde_json::from_value(recorded.clone())
        .map_err(|e| Error::serialization(format!("Option '{COLUMNS}' is malformed: {e}")))?;
    let fields = columns
        .into_iter()
        .map(|(name, kind)| {
            let data_type = match kind.as_str() {
                "int" => DataType::Int64,
                "float" => DataType::Float64,
                "text" => DataType::Utf8,
                "bool" => DataType::Boolean,
                other => {
                    return Err(Error::serialization(format!(
                        "Column '{name}' has unknown type '{other}'"
                    )));
                }
            };
            // Empty CSV fields are read as nulls
            Ok(Field::new(name, data_type, true))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(Schema::new(fields)))
}

fn load_csv(source: &Location<'_>, options: &Options) -> Result<Value> {
    let bytes = source.read()?;
    let header = bool_option(options, "header", true)?;
    let delimiter = byte_option(options, "delimiter", b',')?;

    let schema = if let Some(schema) = recorded_schema(options)? {
        schema
    } else {
        let format = arrow::csv::reader::Format::default()
            .with_header(header)
            .with_delimiter(delimiter);
        format
            .infer_schema(Cursor::new(&bytes), None)
            .map_err(arrow_error("Failed to infer CSV schema"))?
            .0
    };
    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(header)
        .with_delimiter(delimiter)
        .build(Cursor::new(bytes))
        .map_err(arrow_error("Failed to open CSV"))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(arrow_error("Failed to read CSV"))?;
    from_record_batches(&schema, &batches).map(Value::Table)
}

fn dump_arrow(value: &Value, destination: &Location<'_>, _options: &Options) -> Result<()> {
    let table = expect_table("table.arrow", value)?;
    let batch = to_record_batch(table)?;
    let mut writer = arrow::ipc::writer::FileWriter::try_new(Vec::new(), &batch.schema())
        .map_err(arrow_error("Failed to start Arrow file"))?;
    writer
        .write(&batch)
        .map_err(arrow_error("Failed to write Arrow batch"))?;
    writer
        .finish()
        .map_err(arrow_error("Failed to finish Arrow file"))?;
    let bytes = writer
        .into_inner()
        .map_err(arrow_error("Failed to flush Arrow file"))?;
    destination.write(&bytes)
}

fn load_arrow(source: &Location<'_>, _options: &Options) -> Result<Value> {
    let bytes = source.read()?;
    let reader = arrow::ipc::reader::FileReader::try_new(Cursor::new(bytes), None)
        .map_err(arrow_error("Failed to open Arrow file"))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(arrow_error("Failed to read Arrow batch"))?;
    from_record_batches(&schema, &batches).map(Value::Table)
}

/// Convert a table into a single Arrow record batch
pub(crate) fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let (data_type, array): (DataType, ArrayRef) = match &column.data {
            ColumnData::Int(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            ColumnData::Float(v) => {
                (DataType::Float64, Arc::new(Float64Array::from(v.clone())))
            }
            ColumnData::Text(v) => (DataType::Utf8, Arc::new(StringArray::from(v.clone()))),
            ColumnData::Bool(v) => {
                (DataType::Boolean, Arc::new(BooleanArray::from(v.clone())))
            }
        };
        fields.push(Field::new(&column.name, data_type, false));
        arrays.push(array);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(table.num_rows()));
    RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)
        .map_err(arrow_error("Failed to build record batch"))
}

/// Collect Arrow record batches back into a table
pub(crate) fn from_record_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Table> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (index, field) in schema.fields().iter().enumerate() {
        let parts: Vec<&ArrayRef> = batches.iter().map(|b| b.column(index)).collect();
        let data = match field.data_type() {
            DataType::Int64 => ColumnData::Int(collect_primitive::<Int64Array, _>(
                field,
                &parts,
                |a, i| a.value(i),
            )?),
            DataType::Float64 => ColumnData::Float(collect_primitive::<Float64Array, _>(
                field,
                &parts,
                |a, i| a.value(i),
            )?),
            DataType::Boolean => ColumnData::Bool(collect_primitive::<BooleanArray, _>(
                field,
                &parts,
                |a, i| a.value(i),
            )?),
            _ => ColumnData::Text(collect_text(field, &parts)?),
        };
        columns.push(Column::new(field.name().clone(), data));
    }
    Table::new(columns)
}

fn collect_primitive<A, T>(
    field: &Field,
    parts: &[&ArrayRef],
    value: impl Fn(&A, usize) -> T,
) -> Result<Vec<T>>
where
    A: Array + 'static,
{
    let mut out = Vec::new();
    for part in parts {
        let array = part.as_any().downcast_ref::<A>().ok_or_else(|| {
            Error::serialization(format!("Column '{}' has an unexpected layout", field.name()))
        })?;
        for i in 0..array.len() {
            if array.is_null(i) {
                return Err(Error::serialization(format!(
                    "Column '{}' contains a missing value at row {}",
                    field.name(),
                    out.len()
                )));
            }
            out.push(value(array, i));
        }
    }
    Ok(out)
}

fn collect_text(field: &Field, parts: &[&ArrayRef]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for part in parts {
        let as_text = arrow::compute::cast(part, &DataType::Utf8)
            .map_err(arrow_error("Failed to read text column"))?;
        let array = as_text
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| {
                Error::serialization(format!("Column '{}' has an unexpected layout", field.name()))
            })?;
        // Empty CSV fields come back as nulls
        out.extend(array.iter().map(|v| v.unwrap_or_default().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn sample() -> Table {
        Table::new(vec![
            Column::new("id", ColumnData::Int(vec![1, 2, 3])),
            Column::new("score", ColumnData::Float(vec![0.5, 1.25, -3.0])),
            Column::new("label", ColumnData::Text(vec!["a".into(), "b c".into(), "d".into()])),
            Column::new("ok", ColumnData::Bool(vec![true, false, true])),
        ])
        .unwrap()
    }

    #[test]
    fn test_csv_roundtrip() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.csv");
        let value = Value::Table(sample());

        table_csv().dump(&value, &loc, &Options::new()).unwrap();
        let text = String::from_utf8(loc.read().unwrap()).unwrap();
        assert!(text.starts_with("id,score,label,ok"));

        assert_eq!(table_csv().load(&loc, &Options::new()).unwrap(), value);
    }

    #[test]
    fn test_csv_recorded_columns_keep_types() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "zips.csv");
        let value = Value::Table(
            Table::new(vec![
                Column::new("zip", ColumnData::Text(vec!["01234".into(), "2".into()])),
                Column::new("flag", ColumnData::Text(vec!["true".into(), "false".into()])),
            ])
            .unwrap(),
        );

        let recorded = table_csv().describe(&value, &Options::new()).unwrap();
        assert_eq!(recorded["columns"], json!([["zip", "text"], ["flag", "text"]]));

        table_csv().dump(&value, &loc, &Options::new()).unwrap();
        assert_eq!(table_csv().load(&loc, &recorded).unwrap(), value);

        // Without the column list the types are inferred from the text
        let inferred = table_csv().load(&loc, &Options::new()).unwrap();
        assert_ne!(inferred, value);
    }

    #[test]
    fn test_csv_rejects_unknown_recorded_type() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.csv");
        loc.write(b"a\n1\n").unwrap();
        let mut opts = Options::new();
        opts.insert("columns".into(), json!([["a", "decimal"]]));
        let err = table_csv().load(&loc, &opts).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_csv_custom_delimiter() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.csv");
        let mut opts = Options::new();
        opts.insert("delimiter".into(), json!(";"));
        let value = Value::Table(sample());

        table_csv().dump(&value, &loc, &opts).unwrap();
        let text = String::from_utf8(loc.read().unwrap()).unwrap();
        assert!(text.starts_with("id;score;label;ok"));
        assert_eq!(table_csv().load(&loc, &opts).unwrap(), value);
    }

    #[test]
    fn test_arrow_roundtrip() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.arrow");
        let value = Value::Table(sample());

        table_arrow().dump(&value, &loc, &Options::new()).unwrap();
        assert_eq!(table_arrow().load(&loc, &Options::new()).unwrap(), value);
    }

    #[test]
    fn test_arrow_keeps_integral_floats() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.arrow");
        let value = Value::Table(
            Table::new(vec![Column::new("foo", ColumnData::Float(vec![1.0, 2.0]))]).unwrap(),
        );

        table_arrow().dump(&value, &loc, &Options::new()).unwrap();
        assert_eq!(table_arrow().load(&loc, &Options::new()).unwrap(), value);
    }

    #[test]
    fn test_tabular_rejects_objects() {
        let backend = MemoryBackend::new();
        let loc = Location::new(&backend, "foo.csv");
        let err = table_csv()
            .dump(&Value::from("nope"), &loc, &Options::new())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
    }

    #[test]
    fn test_record_batch_conversion_empty_table() {
        let batch = to_record_batch(&Table::default()).unwrap();
        assert_eq!(batch.num_columns(), 0);
        assert_eq!(batch.num_rows(), 0);
    }
}
