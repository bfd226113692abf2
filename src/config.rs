//! Tool configuration (viewplan.json).
//!
//! JSON shape (every field optional):
//! {
//!   "trace_file": "/usr/sap/trace/extrace.py",
//!   "mark_file": "/usr/sap/trace/viewPlan.mark",
//!   "interpreter": "python",
//!   "default_location": "localhost:30003",
//!   "limit_node_length": 10000,
//!   "default_data_representation": "python",
//!   "data_representation": { "BwDocids": "python", "QueryPartOverviewData": "binary" },
//!   "class_ids": { "8": "BwResult" }
//! }

use crate::Result;
use crate::runtime::ClassCatalog;

use anyhow::{Context, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// How a captured connector value is written to disk by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataRepresentation {
    /// `value.pythonTrace('inputValue')`, replayed as statements.
    Python,
    /// `cPickle.dump(value, f, 2)`, reloaded with `cPickle.load`.
    Binary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trace_file: Option<PathBuf>,
    /// Defaults to `viewPlan.mark` next to the trace file.
    pub mark_file: Option<PathBuf>,
    pub interpreter: String,
    /// Location assumed for operations without a location tag when the plan
    /// has no executor location either.
    pub default_location: String,
    pub limit_node_length: usize,
    pub default_data_representation: Option<DataRepresentation>,
    pub data_representation: BTreeMap<String, DataRepresentation>,
    pub class_ids: BTreeMap<u32, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace_file: None,
            mark_file: None,
            interpreter: "python".to_string(),
            default_location: "localhost:30003".to_string(),
            limit_node_length: 10_000,
            default_data_representation: Some(DataRepresentation::Python),
            data_representation: default_representations(),
            class_ids: BTreeMap::new(),
        }
    }
}

fn default_representations() -> BTreeMap<String, DataRepresentation> {
    use DataRepresentation::{Binary, Python};

    [
        ("BwDocids", Python),
        ("BwSids", Python),
        ("BwDict", Python),
        ("BwRefTable", Python),
        ("BwDimFn", Python),
        ("BwResult", Python),
        ("BwDummyData", Python),
        ("BwReturnCode", Python),
        ("BwMultiValues", Python),
        ("BwIndexResult", Python),
        ("BwOuterTuples", Python),
        ("InternalTableData", Python),
        ("BwBits", Python),
        ("BwHandle", Python),
        ("BwFemsDict", Python),
        ("BwARMiningData", Binary),
        ("ParallelHashTableData", Binary),
        ("BwAggrHashMapResultWrapper", Binary),
        ("BwAggrHashMapResultWrapperData", Binary),
        ("QueryPartOverviewData", Binary),
    ]
    .into_iter()
    .map(|(class, repr)| (class.to_string(), repr))
    .collect()
}

impl Config {
    /// Load from a JSON file, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Representation for a connector class; `None` when neither the table
    /// nor the default covers it.
    pub fn representation_for(&self, class: Option<&str>) -> Option<DataRepresentation> {
        class
            .and_then(|c| self.data_representation.get(c).copied())
            .or(self.default_data_representation)
    }

    /// Apply a `Class=python|binary` override (prefixes like `bin` are accepted).
    pub fn override_representation(&mut self, spec: &str) -> Result<()> {
        let Some((class, value)) = spec.split_once('=') else {
            bail!("data representation override must look like Class=python: {}", spec);
        };
        let repr = parse_representation(value).with_context(|| format!("data representation for {}", class))?;
        self.data_representation.insert(class.trim().to_string(), repr);
        Ok(())
    }

    /// Representation for classes missing from the table; `none` clears it.
    pub fn set_default_representation(&mut self, value: &str) -> Result<()> {
        self.default_data_representation = match value.trim() {
            "none" | "" => None,
            v => Some(parse_representation(v)?),
        };
        Ok(())
    }

    /// Mark file: configured path, else `viewPlan.mark` beside the archive.
    pub fn mark_path(&self, trace_file: &Path) -> PathBuf {
        match &self.mark_file {
            Some(p) => p.clone(),
            None => trace_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("viewPlan.mark"),
        }
    }
}

fn parse_representation(value: &str) -> Result<DataRepresentation> {
    let value = value.trim().to_lowercase();
    if !value.is_empty() && "python".starts_with(&value) {
        Ok(DataRepresentation::Python)
    } else if !value.is_empty() && "binary".starts_with(&value) {
        Ok(DataRepresentation::Binary)
    } else {
        bail!("unknown data representation {:?}", value)
    }
}

impl ClassCatalog for Config {
    fn class_name(&self, class_id: u32) -> Option<String> {
        self.class_ids.get(&class_id).cloned()
    }
}
