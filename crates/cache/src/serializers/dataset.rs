//! Dataset encodings
//!
//! `dataset.file` packs the whole dataset into one MessagePack file.
//! `dataset.tree` writes a directory:
//!
//! ```text
//! my_dataset.dstree/
//!   .dataset.json   (attrs, dims and shape of every variable)
//!   sst.f64         (little-endian f64 values in row-major order)
//!   ...
//! ```
//!
//! Both accept the load option `variables`: a list of variable names to keep.

use super::names_option;
use crate::backend::Location;
use crate::registry::{Options, Serializer};
use crate::value::{Dataset, Value, Variable};
use crate::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TREE_METADATA: &str = ".dataset.json";
const TREE_VERSION: u32 = 1;

/// Single-file dataset encoding
#[must_use]
pub fn dataset_file() -> Serializer {
    Serializer::new("dataset.file", dump_file, load_file)
}

/// Directory-tree dataset encoding
#[must_use]
pub fn dataset_tree() -> Serializer {
    Serializer::new("dataset.tree", dump_tree, load_tree)
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeMetadata {
    version: u32,
    attrs: BTreeMap<String, serde_json::Value>,
    variables: BTreeMap<String, VariableMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableMetadata {
    dims: Vec<String>,
    shape: Vec<usize>,
}

fn expect_dataset<'v>(serializer: &str, value: &'v Value) -> Result<&'v Dataset> {
    value
        .as_dataset()
        .ok_or_else(|| Error::unsupported(serializer, value.kind()))
}

fn select(mut dataset: Dataset, options: &Options) -> Result<Dataset> {
    let Some(names) = names_option(options, "variables")? else {
        return Ok(dataset);
    };
    if let Some(missing) = names.iter().find(|n| !dataset.variables.contains_key(*n)) {
        return Err(Error::serialization(format!(
            "Dataset has no variable named '{missing}'"
        )));
    }
    dataset.variables.retain(|name, _| names.contains(name));
    Ok(dataset)
}

fn dump_file(value: &Value, destination: &Location<'_>, _options: &Options) -> Result<()> {
    let dataset = expect_dataset("dataset.file", value)?;
    let bytes = rmp_serde::to_vec_named(dataset)
        .map_err(|e| Error::serialization(format!("Failed to encode dataset: {e}")))?;
    destination.write(&bytes)
}

fn load_file(source: &Location<'_>, options: &Options) -> Result<Value> {
    let bytes = source.read()?;
    let dataset: Dataset = rmp_serde::from_slice(&bytes)
        .map_err(|e| Error::serialization(format!("Failed to decode dataset: {e}")))?;
    select(dataset, options).map(Value::Dataset)
}

fn chunk_name(variable: &str) -> Result<String> {
    if variable.is_empty() || variable.starts_with('.') || variable.contains(['/', '\\']) {
        return Err(Error::serialization(format!(
            "Variable name '{variable}' cannot be stored as a directory entry"
        )));
    }
    Ok(format!("{variable}.f64"))
}

fn dump_tree(value: &Value, destination: &Location<'_>, _options: &Options) -> Result<()> {
    let dataset = expect_dataset("dataset.tree", value)?;
    let mut metadata = TreeMetadata {
        version: TREE_VERSION,
        attrs: dataset.attrs.clone(),
        variables: BTreeMap::new(),
    };

    for (name, variable) in &dataset.variables {
        let chunk = chunk_name(name)?;
        let values: Vec<f64> = variable.data.iter().copied().collect();
        let mut buf = vec![0u8; values.len() * 8];
        LittleEndian::write_f64_into(&values, &mut buf);
        destination.write_child(&chunk, &buf)?;
        metadata.variables.insert(
            name.clone(),
            VariableMetadata {
                dims: variable.dims.clone(),
                shape: variable.data.shape().to_vec(),
            },
        );
    }

    // Metadata last: a tree without it is incomplete
    let json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Error::serialization(format!("Failed to encode dataset metadata: {e}")))?;
    destination.write_child(TREE_METADATA, &json)
}

fn load_tree(source: &Location<'_>, options: &Options) -> Result<Value> {
    let raw = source.read_child(TREE_METADATA)?;
    let metadata: TreeMetadata = serde_json::from_slice(&raw)
        .map_err(|e| Error::serialization(format!("Failed to parse dataset metadata: {e}")))?;
    if metadata.version != TREE_VERSION {
        return Err(Error::serialization(format!(
            "Unsupported dataset tree version {}, expected {TREE_VERSION}",
            metadata.version
        )));
    }

    let wanted = names_option(options, "variables")?;
    let mut dataset = Dataset {
        variables: BTreeMap::new(),
        attrs: metadata.attrs,
    };
    if let Some(names) = &wanted {
        if let Some(missing) = names.iter().find(|n| !metadata.variables.contains_key(*n)) {
            return Err(Error::serialization(format!(
                "Dataset has no variable named '{missing}'"
            )));
        }
    }

    for (name, meta) in metadata.variables {
        if wanted.as_ref().is_some_and(|names| !names.contains(&name)) {
            continue;
        }
        let bytes = source.read_child(&chunk_name(&name)?)?;
        let count: usize = meta.shape.iter().product();
        if bytes.len() != count * 8 {
            return Err(Error::serialization(format!(
                "Chunk for '{name}' holds {} bytes, expected {}",
                bytes.len(),
                count * 8
            )));
        }
        let mut values = vec![0f64; count];
        LittleEndian::read_f64_into(&bytes, &mut values);
        let data = ArrayD::from_shape_vec(IxDyn(&meta.shape), values)
            .map_err(|e| Error::serialization(format!("Bad shape for '{name}': {e}")))?;
        dataset
            .variables
            .insert(name, Variable::new(meta.dims, data)?);
    }
    Ok(Value::Dataset(dataset))
}
