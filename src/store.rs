//! Per-patient group stores produced by the upstream pickling stage.
//!
//! The extraction engine only reads stores. Each case has one store per
//! variable group plus a parallel flag store for labs and vitals.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::catalog::VariableGroup;
use crate::event::{Event, FlagEvent, Value};

/// Variable code to its ascending event stream.
pub type StreamMap = BTreeMap<String, Vec<Event>>;
/// Variable code to its ascending flag stream.
pub type FlagMap = BTreeMap<String, Vec<FlagEvent>>;
/// Demographic field to its admission value; `None` when unrecorded.
pub type Demographics = BTreeMap<String, Option<Value>>;

const FLAG_STORE_DIR: &str = "flag_data";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {store} store for case {case_id}")]
    NotFound { case_id: String, store: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed store {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0} data is not stored as event streams")]
    NotStreamGroup(&'static str),
}

pub trait PatientStore: Send + Sync {
    /// Event streams of one case for a stream-valued group (every group but demographics).
    fn streams(&self, case_id: &str, group: VariableGroup) -> Result<StreamMap, StoreError>;

    fn flags(&self, case_id: &str) -> Result<FlagMap, StoreError>;

    fn demographics(&self, case_id: &str) -> Result<Demographics, StoreError>;
}

/// Stores laid out as `<root>/<group>_data/<case_id>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDirStore {
    root: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DemographicsFile {
    Single(Demographics),
    Wrapped(Vec<Demographics>),
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, store_dir: &str, case_id: &str) -> PathBuf {
        self.root.join(store_dir).join(format!("{case_id}.json"))
    }

    fn read<T: DeserializeOwned>(&self, store_dir: &str, case_id: &str) -> Result<T, StoreError> {
        let path = self.path_for(store_dir, case_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    case_id: case_id.to_string(),
                    store: store_dir.to_string(),
                })
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        debug!(
            component = "store",
            event = "store.read",
            path = %path.display(),
            bytes = raw.len()
        );

        serde_json::from_slice(&raw).map_err(|source| StoreError::Malformed { path, source })
    }
}

impl PatientStore for JsonDirStore {
    fn streams(&self, case_id: &str, group: VariableGroup) -> Result<StreamMap, StoreError> {
        if group == VariableGroup::Demo {
            return Err(StoreError::NotStreamGroup(group.as_str()));
        }
        self.read(&group.store_dir(), case_id)
    }

    fn flags(&self, case_id: &str) -> Result<FlagMap, StoreError> {
        self.read(FLAG_STORE_DIR, case_id)
    }

    fn demographics(&self, case_id: &str) -> Result<Demographics, StoreError> {
        let file: DemographicsFile = self.read(&VariableGroup::Demo.store_dir(), case_id)?;
        Ok(match file {
            DemographicsFile::Single(fields) => fields,
            DemographicsFile::Wrapped(records) => records.into_iter().next().unwrap_or_default(),
        })
    }
}

/// Store held entirely in memory, for tests and embedding callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryStore {
    streams: HashMap<String, BTreeMap<VariableGroup, StreamMap>>,
    flags: HashMap<String, FlagMap>,
    demographics: HashMap<String, Demographics>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_streams(mut self, case_id: &str, group: VariableGroup, streams: StreamMap) -> Self {
        self.streams
            .entry(case_id.to_string())
            .or_default()
            .insert(group, streams);
        self
    }

    pub fn with_flags(mut self, case_id: &str, flags: FlagMap) -> Self {
        self.flags.insert(case_id.to_string(), flags);
        self
    }

    pub fn with_demographics(mut self, case_id: &str, fields: Demographics) -> Self {
        self.demographics.insert(case_id.to_string(), fields);
        self
    }
}

fn not_found(case_id: &str, store: String) -> StoreError {
    StoreError::NotFound {
        case_id: case_id.to_string(),
        store,
    }
}

impl PatientStore for InMemoryStore {
    fn streams(&self, case_id: &str, group: VariableGroup) -> Result<StreamMap, StoreError> {
        if group == VariableGroup::Demo {
            return Err(StoreError::NotStreamGroup(group.as_str()));
        }
        self.streams
            .get(case_id)
            .and_then(|groups| groups.get(&group))
            .cloned()
            .ok_or_else(|| not_found(case_id, group.store_dir()))
    }

    fn flags(&self, case_id: &str) -> Result<FlagMap, StoreError> {
        self.flags
            .get(case_id)
            .cloned()
            .ok_or_else(|| not_found(case_id, FLAG_STORE_DIR.to_string()))
    }

    fn demographics(&self, case_id: &str) -> Result<Demographics, StoreError> {
        self.demographics
            .get(case_id)
            .cloned()
            .ok_or_else(|| not_found(case_id, VariableGroup::Demo.store_dir()))
    }
}
