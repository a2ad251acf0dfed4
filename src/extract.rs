//! Extraction orchestrator.
//!
//! A run plans the labeled case-days, computes every group's rows for each
//! case-day in memory on a local worker pool, then commits them in plan order:
//! one ledger line followed by one line per feature file. A case-day is either
//! committed whole or not at all, so the ledger and every feature file stay
//! row-aligned whatever fails.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::{load_catalog, CatalogError, RootVariable, VariableCatalog, VariableGroup};
use crate::category::CategoryTable;
use crate::event::{DataType, MS_PER_SECOND};
use crate::features::{build_feature_schema, group_features, Feature, VariableContext};
use crate::index::{load_case_day_index, load_labeled_cases, CaseDayIndex, IndexError, LabeledCases};
use crate::ledger::{LedgerError, RowAlignmentLedger};
use crate::observability::{extraction_span, parse_bool};
use crate::output::{prepare_output, FeatureWriter, OutputError, OutputMode};
use crate::store::{JsonDirStore, PatientStore, StoreError};
use crate::window::{partition, Window};

pub const DEFAULT_FLAG_SOURCE_TABLE: &str = "lab_739";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing case-day.
    Strict,
    /// Drop failing case-days and record them in the report.
    ReportAndSkip,
}

/// Which cutoff windows a labeled case-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoffSource {
    /// The participant file's override, falling back to the index cutoff.
    LabeledOverride,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    pub output_mode: OutputMode,
    pub failure_policy: FailurePolicy,
    pub cutoff_source: CutoffSource,
    /// Worker threads; `None` uses one per core.
    pub threads: Option<usize>,
    /// Source table whose lab flags feed the `flag_is` features.
    pub flag_source_table: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            output_mode: OutputMode::Reset,
            failure_policy: FailurePolicy::Strict,
            cutoff_source: CutoffSource::LabeledOverride,
            threads: None,
            flag_source_table: DEFAULT_FLAG_SOURCE_TABLE.to_string(),
        }
    }
}

impl ExtractionConfig {
    pub fn effective_threads(&self) -> usize {
        self.threads.unwrap_or_else(rayon::current_num_threads)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionPaths {
    pub feature_dir: PathBuf,
    pub store_dir: PathBuf,
    pub case_day_file: PathBuf,
    pub labeled_case_file: PathBuf,
    pub participant_dir: PathBuf,
    pub catalog_file: PathBuf,
}

impl ExtractionPaths {
    /// Conventional layout below one data root.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            feature_dir: root.join("features"),
            store_dir: root.join("stores"),
            case_day_file: root.join("case_days.txt"),
            labeled_case_file: root.join("labeled_cases.txt"),
            participant_dir: root.join("participants"),
            catalog_file: root.join("variable_catalog.json"),
        }
    }
}

impl Default for ExtractionPaths {
    fn default() -> Self {
        Self::under("data")
    }
}

pub fn extraction_config_from_env() -> ExtractionConfig {
    let mut config = ExtractionConfig::default();

    if let Ok(raw) = env::var("CASEFEAT_RESET") {
        if let Some(reset) = parse_bool(&raw) {
            config.output_mode = if reset {
                OutputMode::Reset
            } else {
                OutputMode::Append
            };
        }
    }

    if let Ok(raw) = env::var("CASEFEAT_FAILURE_POLICY") {
        if let Some(policy) = parse_failure_policy(&raw) {
            config.failure_policy = policy;
        }
    }

    if let Ok(raw) = env::var("CASEFEAT_CUTOFF_SOURCE") {
        if let Some(source) = parse_cutoff_source(&raw) {
            config.cutoff_source = source;
        }
    }

    if let Ok(raw) = env::var("CASEFEAT_THREADS") {
        if let Ok(threads) = raw.trim().parse::<usize>() {
            if threads > 0 {
                config.threads = Some(threads);
            }
        }
    }

    if let Ok(raw) = env::var("CASEFEAT_FLAG_TABLE") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.flag_source_table = trimmed.to_string();
        }
    }

    config
}

pub fn extraction_paths_from_env() -> ExtractionPaths {
    let mut paths = match env::var("CASEFEAT_DATA_ROOT") {
        Ok(root) if !root.trim().is_empty() => ExtractionPaths::under(root.trim()),
        _ => ExtractionPaths::default(),
    };

    let overrides: [(&str, &mut PathBuf); 6] = [
        ("CASEFEAT_FEATURE_DIR", &mut paths.feature_dir),
        ("CASEFEAT_STORE_DIR", &mut paths.store_dir),
        ("CASEFEAT_CASE_DAY_FILE", &mut paths.case_day_file),
        ("CASEFEAT_LABELED_CASE_FILE", &mut paths.labeled_case_file),
        ("CASEFEAT_PARTICIPANT_DIR", &mut paths.participant_dir),
        ("CASEFEAT_CATALOG_FILE", &mut paths.catalog_file),
    ];
    for (key, slot) in overrides {
        if let Ok(raw) = env::var(key) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                *slot = PathBuf::from(trimmed);
            }
        }
    }

    paths
}

fn parse_failure_policy(raw: &str) -> Option<FailurePolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(FailurePolicy::Strict),
        "skip" | "report_and_skip" => Some(FailurePolicy::ReportAndSkip),
        _ => None,
    }
}

fn parse_cutoff_source(raw: &str) -> Option<CutoffSource> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "labeled" | "labeled_override" => Some(CutoffSource::LabeledOverride),
        "index" => Some(CutoffSource::Index),
        _ => None,
    }
}

/// Identity of one case-day, stamped on every group's rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseDayKey {
    pub case_id: String,
    pub day_index: String,
}

impl fmt::Display for CaseDayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@day{}", self.case_id, self.day_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCaseDay {
    pub key: CaseDayKey,
    pub cutoff_seconds: f64,
    /// Cutoffs of the case's earlier days, in stay order.
    pub prior_cutoffs: Vec<f64>,
}

/// Selects the labeled day of every labeled case, in index order.
pub fn plan_case_days(
    index: &CaseDayIndex,
    labeled: &LabeledCases,
    cutoff_source: CutoffSource,
) -> Vec<PlannedCaseDay> {
    let mut plan = Vec::new();

    for case in index.cases() {
        let Some(label) = labeled.get(&case.case_id) else {
            continue;
        };
        let Some(labeled_day) = label.labeled_day.as_deref() else {
            warn!(
                component = "extract",
                event = "extract.plan.no_labeled_day",
                case_id = %case.case_id
            );
            continue;
        };

        for (position, day) in case.days.iter().enumerate() {
            if day.day_index != labeled_day {
                continue;
            }
            let cutoff_seconds = match cutoff_source {
                CutoffSource::LabeledOverride => label.cutoff_override.unwrap_or(day.cutoff_seconds),
                CutoffSource::Index => day.cutoff_seconds,
            };
            plan.push(PlannedCaseDay {
                key: CaseDayKey {
                    case_id: case.case_id.clone(),
                    day_index: day.day_index.clone(),
                },
                cutoff_seconds,
                prior_cutoffs: case.prior_cutoffs(position),
            });
        }
    }

    info!(
        component = "extract",
        event = "extract.plan.built",
        indexed_cases = index.cases().len(),
        labeled_cases = labeled.len(),
        planned_case_days = plan.len()
    );

    plan
}

#[derive(Debug, Error)]
pub enum CaseDayError {
    #[error("{key}: {source}")]
    Store { key: CaseDayKey, source: StoreError },
    #[error("{key}: cutoff {cutoff_seconds} is not a valid timestamp")]
    InvalidCutoff {
        key: CaseDayKey,
        cutoff_seconds: f64,
    },
    /// A rendered cell would add a column or a row to its feature file.
    #[error("{key}: {group} feature {feature} for {column} renders a separator: {value:?}")]
    UnsafeCell {
        key: CaseDayKey,
        group: &'static str,
        feature: String,
        column: String,
        value: String,
    },
}

impl CaseDayError {
    pub fn key(&self) -> &CaseDayKey {
        match self {
            Self::Store { key, .. }
            | Self::InvalidCutoff { key, .. }
            | Self::UnsafeCell { key, .. } => key,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("case-day failed: {0}")]
    CaseDay(#[from] CaseDayError),
}

/// One row per feature file of a group, for one case-day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRows {
    pub group: VariableGroup,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDayRows {
    pub key: CaseDayKey,
    pub groups: Vec<GroupRows>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub planned_case_days: usize,
    pub committed_case_days: usize,
    pub skipped_case_days: Vec<CaseDayKey>,
    pub first_error: Option<String>,
    /// Rows in the ledger and in every feature file after the run.
    pub rows_per_file: usize,
    pub threads: usize,
}

/// Computes every group's rows for a case-day without touching the output.
pub struct CaseDayExtractor<'a> {
    catalog: &'a VariableCatalog,
    roots: Vec<RootVariable>,
    features: Vec<(VariableGroup, Vec<Feature>)>,
    flagged_table: &'a str,
    store: &'a dyn PatientStore,
    no_categories: CategoryTable,
}

fn stream_of<'s, T>(streams: &'s BTreeMap<String, Vec<T>>, code: &str) -> &'s [T] {
    streams.get(code).map(Vec::as_slice).unwrap_or(&[])
}

fn is_row_safe(cell: &str) -> bool {
    !cell.contains(|c: char| matches!(c, ',' | '\n' | '\r'))
}

/// One comma-joined line per feature, one cell per `(column, context)`.
fn render(
    plan: &PlannedCaseDay,
    group: VariableGroup,
    features: &[Feature],
    contexts: &[(&str, VariableContext<'_>)],
) -> Result<GroupRows, CaseDayError> {
    let mut lines = Vec::with_capacity(features.len());
    for feature in features {
        let mut cells = Vec::with_capacity(contexts.len());
        for (column, ctx) in contexts {
            let cell = feature.kind.evaluate(ctx);
            if !is_row_safe(&cell) {
                return Err(CaseDayError::UnsafeCell {
                    key: plan.key.clone(),
                    group: group.as_str(),
                    feature: feature.name.clone(),
                    column: (*column).to_string(),
                    value: cell,
                });
            }
            cells.push(cell);
        }
        lines.push(cells.join(","));
    }
    Ok(GroupRows { group, lines })
}

impl<'a> CaseDayExtractor<'a> {
    pub fn new(
        catalog: &'a VariableCatalog,
        store: &'a dyn PatientStore,
        flagged_table: &'a str,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            catalog,
            roots: catalog.root_variables()?,
            features: VariableGroup::ALL
                .into_iter()
                .map(|group| (group, group_features(group)))
                .collect(),
            flagged_table,
            store,
            no_categories: CategoryTable::default(),
        })
    }

    pub fn extract(&self, plan: &PlannedCaseDay) -> Result<CaseDayRows, CaseDayError> {
        let cutoff_utc = cutoff_timestamp(plan)?;
        debug!(
            component = "extract",
            event = "extract.case_day.start",
            case_day = %plan.key,
            cutoff_utc = %cutoff_utc.to_rfc3339(),
            prior_days = plan.prior_cutoffs.len()
        );

        let mut groups = Vec::with_capacity(self.features.len());
        for (group, features) in &self.features {
            let rows = match group {
                VariableGroup::Root => self.root_rows(plan, features)?,
                VariableGroup::Demo => self.demo_rows(plan, features)?,
                _ => self.stream_rows(plan, *group, features)?,
            };
            groups.push(rows);
        }

        Ok(CaseDayRows {
            key: plan.key.clone(),
            groups,
        })
    }

    fn store_error(plan: &PlannedCaseDay) -> impl Fn(StoreError) -> CaseDayError + '_ {
        move |source| CaseDayError::Store {
            key: plan.key.clone(),
            source,
        }
    }

    fn root_rows(
        &self,
        plan: &PlannedCaseDay,
        features: &[Feature],
    ) -> Result<GroupRows, CaseDayError> {
        let case_id = plan.key.case_id.as_str();
        let streams = self
            .store
            .streams(case_id, VariableGroup::Root)
            .map_err(Self::store_error(plan))?;
        let flags = self.store.flags(case_id).map_err(Self::store_error(plan))?;

        let contexts: Vec<(&str, VariableContext<'_>)> = self
            .roots
            .iter()
            .map(|root| {
                (
                    root.code.as_str(),
                    VariableContext {
                        window: partition(stream_of(&streams, &root.code), plan.cutoff_seconds),
                        flags: partition(stream_of(&flags, &root.code), plan.cutoff_seconds).pre,
                        data_type: root.data_type,
                        categories: &root.categories,
                        source_table: root.source_table.as_deref(),
                        flagged_table: self.flagged_table,
                        cutoff_seconds: plan.cutoff_seconds,
                        prior_cutoffs: &plan.prior_cutoffs,
                        attribute: None,
                    },
                )
            })
            .collect();

        render(plan, VariableGroup::Root, features, &contexts)
    }

    fn stream_rows(
        &self,
        plan: &PlannedCaseDay,
        group: VariableGroup,
        features: &[Feature],
    ) -> Result<GroupRows, CaseDayError> {
        let streams = self
            .store
            .streams(&plan.key.case_id, group)
            .map_err(Self::store_error(plan))?;

        let contexts: Vec<(&str, VariableContext<'_>)> = self
            .catalog
            .columns(group)
            .iter()
            .map(|code| {
                (
                    code.as_str(),
                    VariableContext {
                        window: partition(stream_of(&streams, code), plan.cutoff_seconds),
                        flags: &[],
                        data_type: DataType::Interval,
                        categories: &self.no_categories,
                        source_table: None,
                        flagged_table: self.flagged_table,
                        cutoff_seconds: plan.cutoff_seconds,
                        prior_cutoffs: &plan.prior_cutoffs,
                        attribute: None,
                    },
                )
            })
            .collect();

        render(plan, group, features, &contexts)
    }

    fn demo_rows(
        &self,
        plan: &PlannedCaseDay,
        features: &[Feature],
    ) -> Result<GroupRows, CaseDayError> {
        let fields = self
            .store
            .demographics(&plan.key.case_id)
            .map_err(Self::store_error(plan))?;

        let contexts: Vec<(&str, VariableContext<'_>)> = self
            .catalog
            .columns(VariableGroup::Demo)
            .iter()
            .map(|field| {
                (
                    field.as_str(),
                    VariableContext {
                        window: Window::empty(),
                        flags: &[],
                        data_type: DataType::Interval,
                        categories: &self.no_categories,
                        source_table: None,
                        flagged_table: self.flagged_table,
                        cutoff_seconds: plan.cutoff_seconds,
                        prior_cutoffs: &plan.prior_cutoffs,
                        attribute: fields.get(field).and_then(Option::as_ref),
                    },
                )
            })
            .collect();

        render(plan, VariableGroup::Demo, features, &contexts)
    }
}

fn cutoff_timestamp(plan: &PlannedCaseDay) -> Result<DateTime<Utc>, CaseDayError> {
    let invalid = || CaseDayError::InvalidCutoff {
        key: plan.key.clone(),
        cutoff_seconds: plan.cutoff_seconds,
    };
    if !plan.cutoff_seconds.is_finite() {
        return Err(invalid());
    }
    Utc.timestamp_millis_opt((plan.cutoff_seconds * MS_PER_SECOND).round() as i64)
        .single()
        .ok_or_else(invalid)
}

fn commit(
    ledger: &mut RowAlignmentLedger,
    writer: &mut FeatureWriter,
    rows: &CaseDayRows,
) -> Result<(), ExtractError> {
    ledger.append(&rows.key.case_id)?;
    for group in &rows.groups {
        writer.append_group(group.group, &group.lines)?;
    }
    Ok(())
}

/// Runs one extraction into `feature_dir`.
pub fn run_extraction(
    catalog: &VariableCatalog,
    case_days: &CaseDayIndex,
    labeled: &LabeledCases,
    store: &dyn PatientStore,
    feature_dir: &Path,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    let _span = extraction_span(feature_dir, config).entered();
    let started = Instant::now();
    catalog.validate()?;
    let extractor = CaseDayExtractor::new(catalog, store, &config.flag_source_table)?;

    let schema = build_feature_schema(catalog);
    let reset = config.output_mode == OutputMode::Reset;
    prepare_output(feature_dir, &schema, config.output_mode)?;
    let mut ledger = RowAlignmentLedger::open(feature_dir, reset)?;
    let mut writer = FeatureWriter::open(feature_dir, &schema)?;

    let plan = plan_case_days(case_days, labeled, config.cutoff_source);
    let threads = config.effective_threads();

    info!(
        component = "extract",
        event = "extract.run.start",
        feature_dir = %feature_dir.display(),
        output_mode = ?config.output_mode,
        failure_policy = ?config.failure_policy,
        cutoff_source = ?config.cutoff_source,
        planned_case_days = plan.len(),
        existing_rows = ledger.rows(),
        threads
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let mut report = ExtractionReport {
        planned_case_days: plan.len(),
        threads,
        ..ExtractionReport::default()
    };

    // Rows of at most one chunk are held in memory; a strict abort leaves
    // later chunks uncomputed.
    for chunk in plan.chunks(commit_chunk_len(threads)) {
        let results: Vec<Result<CaseDayRows, CaseDayError>> =
            pool.install(|| chunk.par_iter().map(|day| extractor.extract(day)).collect());
        commit_chunk(&mut ledger, &mut writer, &mut report, results, config.failure_policy)?;
        debug!(
            component = "extract",
            event = "extract.chunk.committed",
            chunk_case_days = chunk.len(),
            committed_case_days = report.committed_case_days
        );
    }

    writer.flush()?;
    ledger.flush()?;
    report.rows_per_file = ledger.rows();

    info!(
        component = "extract",
        event = "extract.run.complete",
        committed_case_days = report.committed_case_days,
        skipped_case_days = report.skipped_case_days.len(),
        rows_per_file = report.rows_per_file,
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    Ok(report)
}

/// Case-days computed per worker thread before the pool hands rows back for commit.
pub const CASE_DAYS_PER_WORKER: usize = 8;

fn commit_chunk_len(threads: usize) -> usize {
    threads.max(1) * CASE_DAYS_PER_WORKER
}

/// Commits a computed chunk in plan order, applying `policy` to failed case-days.
fn commit_chunk(
    ledger: &mut RowAlignmentLedger,
    writer: &mut FeatureWriter,
    report: &mut ExtractionReport,
    results: Vec<Result<CaseDayRows, CaseDayError>>,
    policy: FailurePolicy,
) -> Result<(), ExtractError> {
    for result in results {
        match result {
            Ok(rows) => {
                commit(ledger, writer, &rows)?;
                report.committed_case_days += 1;
            }
            Err(err) if policy == FailurePolicy::Strict => {
                writer.flush()?;
                ledger.flush()?;
                error!(
                    component = "extract",
                    event = "extract.run.aborted",
                    case_day = %err.key(),
                    committed_case_days = report.committed_case_days,
                    error = %err
                );
                return Err(err.into());
            }
            Err(err) => {
                warn!(
                    component = "extract",
                    event = "extract.case_day.skipped",
                    case_day = %err.key(),
                    error = %err
                );
                report.skipped_case_days.push(err.key().clone());
                if report.first_error.is_none() {
                    report.first_error = Some(err.to_string());
                }
            }
        }
    }
    Ok(())
}

/// Loads every input from `paths` and runs against the JSON store directory.
pub fn run_extraction_from_paths(
    paths: &ExtractionPaths,
    config: &ExtractionConfig,
) -> Result<ExtractionReport, ExtractError> {
    let catalog = load_catalog(&paths.catalog_file)?;
    let case_days = load_case_day_index(&paths.case_day_file)?;
    let labeled = load_labeled_cases(&paths.labeled_case_file, &paths.participant_dir)?;
    let store = JsonDirStore::new(&paths.store_dir);

    run_extraction(
        &catalog,
        &case_days,
        &labeled,
        &store,
        &paths.feature_dir,
        config,
    )
}
