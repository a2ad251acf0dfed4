//! Variable metadata: column order per group and per-root measurement scale.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::category::{CategoryTable, DiscreteResultMapping};
use crate::event::DataType;

/// The six independently extracted variable groups, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableGroup {
    Root,
    Med,
    Procedure,
    Micro,
    Io,
    Demo,
}

impl VariableGroup {
    pub const ALL: [VariableGroup; 6] = [
        Self::Root,
        Self::Med,
        Self::Procedure,
        Self::Micro,
        Self::Io,
        Self::Demo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Med => "med",
            Self::Procedure => "procedure",
            Self::Micro => "micro",
            Self::Io => "io",
            Self::Demo => "demo",
        }
    }

    /// Per-patient store directory name.
    pub fn store_dir(self) -> String {
        format!("{}_data", self.as_str())
    }

    pub fn feature_dir(self) -> String {
        format!("{}_feature_files", self.as_str())
    }

    pub fn columns_file(self) -> String {
        format!("{}_feature_columns.txt", self.as_str())
    }
}

/// Labs and vitals metadata resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct RootVariable {
    pub code: String,
    pub data_type: DataType,
    pub source_table: Option<String>,
    pub categories: CategoryTable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableCatalog {
    pub root_order: Vec<String>,
    pub med_order: Vec<String>,
    pub procedure_order: Vec<String>,
    pub micro_order: Vec<String>,
    pub io_order: Vec<String>,
    pub demo_order: Vec<String>,
    #[serde(default)]
    pub root_data_types: BTreeMap<String, DataType>,
    #[serde(default)]
    pub root_tables: BTreeMap<String, String>,
    #[serde(default)]
    pub discrete_result_mapping: DiscreteResultMapping,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("root variable {0} has no data type")]
    MissingDataType(String),
    #[error("duplicate column {column} in {group} order")]
    DuplicateColumn { group: &'static str, column: String },
}

impl VariableCatalog {
    pub fn columns(&self, group: VariableGroup) -> &[String] {
        match group {
            VariableGroup::Root => &self.root_order,
            VariableGroup::Med => &self.med_order,
            VariableGroup::Procedure => &self.procedure_order,
            VariableGroup::Micro => &self.micro_order,
            VariableGroup::Io => &self.io_order,
            VariableGroup::Demo => &self.demo_order,
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        for group in VariableGroup::ALL {
            let mut seen = HashSet::new();
            for column in self.columns(group) {
                if !seen.insert(column.as_str()) {
                    return Err(CatalogError::DuplicateColumn {
                        group: group.as_str(),
                        column: column.clone(),
                    });
                }
            }
        }

        if let Some(code) = self
            .root_order
            .iter()
            .find(|code| !self.root_data_types.contains_key(*code))
        {
            return Err(CatalogError::MissingDataType(code.clone()));
        }

        Ok(())
    }

    /// Root metadata in column order, with category tables flattened once.
    pub fn root_variables(&self) -> Result<Vec<RootVariable>, CatalogError> {
        self.root_order
            .iter()
            .map(|code| {
                let data_type = *self
                    .root_data_types
                    .get(code)
                    .ok_or_else(|| CatalogError::MissingDataType(code.clone()))?;
                Ok(RootVariable {
                    code: code.clone(),
                    data_type,
                    source_table: self.root_tables.get(code).cloned(),
                    categories: CategoryTable::resolve(code, &self.discrete_result_mapping),
                })
            })
            .collect()
    }
}

pub fn load_catalog(path: &Path) -> Result<VariableCatalog, CatalogError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let catalog: VariableCatalog = serde_json::from_str(&raw)?;
    catalog.validate()?;

    info!(
        component = "catalog",
        event = "catalog.loaded",
        path = %path.display(),
        root_columns = catalog.root_order.len(),
        med_columns = catalog.med_order.len(),
        procedure_columns = catalog.procedure_order.len(),
        micro_columns = catalog.micro_order.len(),
        io_columns = catalog.io_order.len(),
        demo_columns = catalog.demo_order.len()
    );

    Ok(catalog)
}
