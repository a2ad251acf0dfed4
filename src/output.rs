//! Feature output directory: column manifests, persisted schema, and the
//! per-feature row files.
//!
//! Layout under the feature directory:
//! - `{group}_feature_columns.txt`, one variable code per line
//! - `feature_schema.json`
//! - `{group}_feature_files/<feature>.txt`, one comma-separated row per case-day
//!
//! The ledger lives beside them (see [`crate::ledger`]).

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::VariableGroup;
use crate::features::{assert_schema_compatible, FeatureSchema, GroupSchema, SchemaError};
use crate::ledger::{count_lines, LEDGER_FILE};

pub const SCHEMA_FILE: &str = "feature_schema.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Clear every prior output before the first row.
    Reset,
    /// Continue a previous run in the same directory.
    Append,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid schema file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot append: no schema at {0}")]
    MissingSchema(PathBuf),
    #[error("incompatible output directory: {0}")]
    Schema(#[from] SchemaError),
    #[error("{path} has {found} rows but the ledger has {expected}")]
    Misaligned {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("{group} row has {found} feature lines, expected {expected}")]
    RowWidth {
        group: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("no {0} group in the output schema")]
    UnknownGroup(&'static str),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn feature_file_path(dir: &Path, group: VariableGroup, feature: &str) -> PathBuf {
    dir.join(group.feature_dir()).join(format!("{feature}.txt"))
}

/// Makes `dir` ready for rows under `mode` and returns the number of rows
/// already present (always 0 after a reset).
pub fn prepare_output(
    dir: &Path,
    schema: &FeatureSchema,
    mode: OutputMode,
) -> Result<usize, OutputError> {
    match mode {
        OutputMode::Reset => {
            reset_output(dir, schema)?;
            Ok(0)
        }
        OutputMode::Append => verify_appendable(dir, schema),
    }
}

fn reset_output(dir: &Path, schema: &FeatureSchema) -> Result<(), OutputError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    for group in &schema.groups {
        write_manifest(dir, group)?;

        let group_dir = dir.join(group.group.feature_dir());
        if group_dir.exists() {
            fs::remove_dir_all(&group_dir).map_err(io_error(&group_dir))?;
        }
        fs::create_dir_all(&group_dir).map_err(io_error(&group_dir))?;
        for feature in &group.features {
            let path = feature_file_path(dir, group.group, feature);
            File::create(&path).map_err(io_error(&path))?;
        }
    }

    let schema_path = dir.join(SCHEMA_FILE);
    let payload = serde_json::to_vec_pretty(schema).map_err(|source| OutputError::Json {
        path: schema_path.clone(),
        source,
    })?;
    write_atomic(&schema_path, &payload)?;

    info!(
        component = "output",
        event = "output.reset",
        dir = %dir.display(),
        feature_files = schema.feature_file_count(),
        fingerprint = %schema.fingerprint
    );
    Ok(())
}

fn write_manifest(dir: &Path, group: &GroupSchema) -> Result<(), OutputError> {
    let path = dir.join(group.group.columns_file());
    let mut body = String::new();
    for column in &group.columns {
        body.push_str(column);
        body.push('\n');
    }
    fs::write(&path, body).map_err(io_error(&path))
}

fn verify_appendable(dir: &Path, schema: &FeatureSchema) -> Result<usize, OutputError> {
    let schema_path = dir.join(SCHEMA_FILE);
    if !schema_path.exists() {
        return Err(OutputError::MissingSchema(schema_path));
    }
    let raw = fs::read(&schema_path).map_err(io_error(&schema_path))?;
    let persisted: FeatureSchema =
        serde_json::from_slice(&raw).map_err(|source| OutputError::Json {
            path: schema_path.clone(),
            source,
        })?;
    assert_schema_compatible(persisted.version, &persisted.fingerprint, schema)?;

    let ledger_path = dir.join(LEDGER_FILE);
    let rows = count_lines(&ledger_path).map_err(io_error(&ledger_path))?;

    for group in &schema.groups {
        for feature in &group.features {
            let path = feature_file_path(dir, group.group, feature);
            let found = count_lines(&path).map_err(io_error(&path))?;
            if found != rows {
                return Err(OutputError::Misaligned {
                    path,
                    expected: rows,
                    found,
                });
            }
        }
    }

    info!(
        component = "output",
        event = "output.append.verified",
        dir = %dir.display(),
        existing_rows = rows
    );
    Ok(rows)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OutputError> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp_path).map_err(io_error(&tmp_path))?;
        file.write_all(bytes).map_err(io_error(&tmp_path))?;
        file.sync_all().map_err(io_error(&tmp_path))?;
    }
    fs::rename(&tmp_path, path).map_err(io_error(path))
}

#[derive(Debug)]
struct FeatureFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

#[derive(Debug)]
struct GroupFiles {
    group: VariableGroup,
    files: Vec<FeatureFile>,
}

/// Append-only writers for every feature file of the schema, kept open for a run.
#[derive(Debug)]
pub struct FeatureWriter {
    groups: Vec<GroupFiles>,
}

impl FeatureWriter {
    pub fn open(dir: &Path, schema: &FeatureSchema) -> Result<Self, OutputError> {
        let mut groups = Vec::with_capacity(schema.groups.len());
        for group in &schema.groups {
            let mut files = Vec::with_capacity(group.features.len());
            for feature in &group.features {
                let path = feature_file_path(dir, group.group, feature);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(io_error(&path))?;
                files.push(FeatureFile {
                    path,
                    writer: BufWriter::new(file),
                });
            }
            groups.push(GroupFiles {
                group: group.group,
                files,
            });
        }

        Ok(Self { groups })
    }

    /// Appends one row to each feature file of `group`; `lines[i]` goes to the
    /// i-th feature in schema order.
    pub fn append_group(
        &mut self,
        group: VariableGroup,
        lines: &[String],
    ) -> Result<(), OutputError> {
        let files = self
            .groups
            .iter_mut()
            .find(|g| g.group == group)
            .ok_or(OutputError::UnknownGroup(group.as_str()))?;

        if files.files.len() != lines.len() {
            return Err(OutputError::RowWidth {
                group: group.as_str(),
                expected: files.files.len(),
                found: lines.len(),
            });
        }

        for (file, line) in files.files.iter_mut().zip(lines) {
            writeln!(file.writer, "{line}").map_err(io_error(&file.path))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        for group in &mut self.groups {
            for file in &mut group.files {
                file.writer.flush().map_err(io_error(&file.path))?;
            }
        }
        debug!(
            component = "output",
            event = "output.flush",
            groups = self.groups.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::VariableCatalog;
    use crate::event::DataType;
    use crate::features::build_feature_schema;

    fn schema() -> FeatureSchema {
        let mut catalog = VariableCatalog {
            root_order: vec!["GLU".to_string()],
            io_order: vec!["urine".to_string(), "drain".to_string()],
            ..VariableCatalog::default()
        };
        catalog
            .root_data_types
            .insert("GLU".to_string(), DataType::Interval);
        build_feature_schema(&catalog)
    }

    #[test]
    fn reset_writes_manifests_schema_and_empty_feature_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        fs::create_dir_all(dir.path().join("io_feature_files")).unwrap();
        fs::write(dir.path().join("io_feature_files/stale.txt"), "x\n").unwrap();

        assert_eq!(prepare_output(dir.path(), &schema, OutputMode::Reset).unwrap(), 0);

        assert_eq!(
            fs::read_to_string(dir.path().join("io_feature_columns.txt")).unwrap(),
            "urine\ndrain\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("med_feature_columns.txt")).unwrap(),
            ""
        );
        assert!(!dir.path().join("io_feature_files/stale.txt").exists());
        assert!(feature_file_path(dir.path(), VariableGroup::Io, "los_io_features").exists());

        let persisted: FeatureSchema =
            serde_json::from_slice(&fs::read(dir.path().join(SCHEMA_FILE)).unwrap()).unwrap();
        assert_eq!(persisted, schema);
    }

    #[test]
    fn writer_appends_rows_and_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        prepare_output(dir.path(), &schema, OutputMode::Reset).unwrap();

        let mut writer = FeatureWriter::open(dir.path(), &schema).unwrap();
        writer
            .append_group(VariableGroup::Io, &["0,5".to_string(), "12,".to_string()])
            .unwrap();
        assert!(matches!(
            writer.append_group(VariableGroup::Io, &["0".to_string()]),
            Err(OutputError::RowWidth { expected: 2, found: 1, .. })
        ));
        writer.flush().unwrap();

        assert_eq!(
            fs::read_to_string(feature_file_path(dir.path(), VariableGroup::Io, "los_io_features"))
                .unwrap(),
            "12,\n"
        );
    }

    #[test]
    fn append_requires_schema_and_aligned_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();

        assert!(matches!(
            prepare_output(dir.path(), &schema, OutputMode::Append),
            Err(OutputError::MissingSchema(_))
        ));

        prepare_output(dir.path(), &schema, OutputMode::Reset).unwrap();
        assert_eq!(prepare_output(dir.path(), &schema, OutputMode::Append).unwrap(), 0);

        fs::write(dir.path().join(LEDGER_FILE), "A\n").unwrap();
        assert!(matches!(
            prepare_output(dir.path(), &schema, OutputMode::Append),
            Err(OutputError::Misaligned { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn append_rejects_a_different_schema() {
        let dir = tempfile::tempdir().unwrap();
        prepare_output(dir.path(), &schema(), OutputMode::Reset).unwrap();

        let mut other = schema();
        other.fingerprint = "0".repeat(64);
        assert!(matches!(
            prepare_output(dir.path(), &other, OutputMode::Append),
            Err(OutputError::Schema(SchemaError::FingerprintMismatch { .. }))
        ));
    }
}
