//! Case-day feature extraction for ICU deterioration modelling.
//!
//! Implemented scope:
//! - per-patient event streams partitioned around a decision cutoff
//! - the per-group feature operator library and feature catalogue
//! - row-aligned feature files plus the case-order ledger, with reset/append runs

mod catalog;
mod category;
mod event;
mod extract;
mod features;
mod index;
mod ledger;
mod observability;
mod operators;
mod output;
mod store;
mod window;

pub use catalog::{load_catalog, CatalogError, RootVariable, VariableCatalog, VariableGroup};
pub use category::{flag_is, CategoryTable, DiscreteResultMapping, FlagTarget, CATEGORY_BUCKETS};
pub use event::{
    format_number, DataType, Event, FlagEvent, Timestamped, UnknownDataType, Value,
    MS_PER_SECOND, SECONDS_PER_DAY,
};
pub use extract::{
    extraction_config_from_env, extraction_paths_from_env, plan_case_days, run_extraction,
    run_extraction_from_paths, CaseDayError, CaseDayExtractor, CaseDayKey, CaseDayRows,
    CutoffSource, ExtractError, ExtractionConfig, ExtractionPaths, ExtractionReport,
    FailurePolicy, GroupRows, PlannedCaseDay, CASE_DAYS_PER_WORKER, DEFAULT_FLAG_SOURCE_TABLE,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, group_features, Feature, FeatureKind,
    FeatureSchema, GroupSchema, SchemaError, VariableContext, FEATURE_SCHEMA_VERSION,
};
pub use index::{
    load_case_day_index, load_labeled_cases, CaseDayIndex, CaseDays, DayCutoff, IndexError,
    LabeledCase, LabeledCases,
};
pub use ledger::{count_lines, LedgerError, RowAlignmentLedger, LEDGER_FILE};
pub use observability::{
    extraction_span, init_logging, log_app_start, log_inputs_selected, logging_config_from_env,
    LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use operators::{
    abs_slope, apex, baseline, category_at, count_different_values, count_sequential_days,
    daily_io, days_since, days_since_last_change, difference, difference_from,
    event_frequency_variation, event_is_ongoing, ever_occurred, extreme_event, inverse_days,
    los_io, max_30_hr, mean_30_hr, min_30_hr, nadir, percentage_change, percentage_change_from,
    recency_of_sequential_days, slope, slope_to, value_at, Extreme, Position, Reference,
    DAILY_IO_AGE_SECONDS, WINDOW_30_HR_DAYS,
};
pub use output::{feature_file_path, prepare_output, FeatureWriter, OutputError, OutputMode, SCHEMA_FILE};
pub use store::{
    Demographics, FlagMap, InMemoryStore, JsonDirStore, PatientStore, StoreError, StreamMap,
};
pub use window::{partition, Window};
