//! Per-group feature catalogue and the persisted feature schema.
//!
//! Each group emits one feature file per [`Feature`], in the order returned by
//! [`group_features`]. Every file has one column per variable of the group,
//! in catalog column order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::catalog::{VariableCatalog, VariableGroup};
use crate::category::{flag_is, CategoryTable, FlagTarget};
use crate::event::{DataType, Event, FlagEvent, Value};
use crate::operators::{self, Extreme, Position, Reference};
use crate::window::Window;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

const CATEGORY_CLASSES: [u8; 4] = [1, 2, 3, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    EverOccurred,
    /// Occurrence within the day after the cutoff.
    NewEventOrdered,
    Value(Position),
    Category(Position, u8),
    DaysSince(Position),
    DaysSinceLastChange,
    CountDifferentValues,
    EventFrequencyVariation,
    Baseline,
    Apex,
    Nadir,
    Difference(Position, Position),
    PercentageChange(Position, Position),
    Slope(Position, Position),
    DifferenceFrom(Reference),
    PercentageChangeFrom(Reference),
    SlopeTo(Extreme),
    FlagIs(FlagTarget),
    InverseDays,
    AbsSlope,
    Max30Hr,
    Min30Hr,
    Mean30Hr,
    EventIsOngoing,
    CountSequentialDays,
    RecencyOfSequentialDays,
    DailyIo,
    LosIo,
    /// Admission-time attribute, not a stream.
    Demographic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub kind: FeatureKind,
}

impl Feature {
    fn new(name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.txt", self.name)
    }
}

/// Everything an operator may read about one variable on one case-day.
#[derive(Debug, Clone, Copy)]
pub struct VariableContext<'a> {
    pub window: Window<'a, Event>,
    /// Flag events at or before the cutoff.
    pub flags: &'a [FlagEvent],
    pub data_type: DataType,
    pub categories: &'a CategoryTable,
    pub source_table: Option<&'a str>,
    /// The one source table whose flags are meaningful.
    pub flagged_table: &'a str,
    pub cutoff_seconds: f64,
    pub prior_cutoffs: &'a [f64],
    pub attribute: Option<&'a Value>,
}

impl FeatureKind {
    pub fn evaluate(self, ctx: &VariableContext<'_>) -> String {
        let pre = ctx.window.pre;
        let cutoff = ctx.cutoff_seconds;
        let dt = ctx.data_type;

        match self {
            Self::EverOccurred => operators::ever_occurred(pre),
            Self::NewEventOrdered => operators::ever_occurred(ctx.window.post),
            Self::Value(position) => operators::value_at(pre, position, ctx.categories, dt),
            Self::Category(position, class) => {
                operators::category_at(pre, position, ctx.categories, class, dt)
            }
            Self::DaysSince(position) => operators::days_since(pre, cutoff, position),
            Self::DaysSinceLastChange => operators::days_since_last_change(pre, cutoff),
            Self::CountDifferentValues => operators::count_different_values(pre),
            Self::EventFrequencyVariation => operators::event_frequency_variation(pre),
            Self::Baseline => operators::baseline(pre, dt),
            Self::Apex => operators::apex(pre, dt),
            Self::Nadir => operators::nadir(pre, dt),
            Self::Difference(to, from) => operators::difference(pre, to, from, dt),
            Self::PercentageChange(to, from) => operators::percentage_change(pre, to, from, dt),
            Self::Slope(to, from) => operators::slope(pre, to, from, dt),
            Self::DifferenceFrom(reference) => operators::difference_from(pre, reference, dt),
            Self::PercentageChangeFrom(reference) => {
                operators::percentage_change_from(pre, reference, dt)
            }
            Self::SlopeTo(extreme) => operators::slope_to(pre, extreme, dt),
            Self::FlagIs(target) => flag_is(ctx.flags, ctx.source_table, ctx.flagged_table, target),
            Self::InverseDays => operators::inverse_days(pre, cutoff),
            Self::AbsSlope => operators::abs_slope(pre, dt),
            Self::Max30Hr => operators::max_30_hr(pre, cutoff, dt),
            Self::Min30Hr => operators::min_30_hr(pre, cutoff, dt),
            Self::Mean30Hr => operators::mean_30_hr(pre, cutoff, dt),
            Self::EventIsOngoing => operators::event_is_ongoing(pre, ctx.window.post, cutoff),
            Self::CountSequentialDays => operators::count_sequential_days(pre, ctx.prior_cutoffs),
            Self::RecencyOfSequentialDays => {
                operators::recency_of_sequential_days(pre, ctx.prior_cutoffs)
            }
            Self::DailyIo => operators::daily_io(pre, cutoff),
            Self::LosIo => operators::los_io(pre),
            Self::Demographic => ctx.attribute.map(Value::to_string).unwrap_or_default(),
        }
    }
}

const POSITIONS: [(Position, &str); 3] = [
    (Position::Last, "last_value"),
    (Position::SecondToLast, "second_to_last_value"),
    (Position::First, "first_value"),
];

const POSITION_PAIRS: [(Position, Position, &str); 2] = [
    (Position::Last, Position::SecondToLast, "last_second_last"),
    (Position::Last, Position::First, "last_first"),
];

const REFERENCES: [(Reference, &str); 3] = [
    (Reference::Baseline, "baseline"),
    (Reference::Apex, "apex"),
    (Reference::Nadir, "nadir"),
];

const EXTREMES: [(Extreme, &str); 2] = [(Extreme::Apex, "apex"), (Extreme::Nadir, "nadir")];

fn root_features() -> Vec<Feature> {
    let p = |name: &str| format!("root-{name}");
    let mut features = vec![Feature::new(p("ever_occurred"), FeatureKind::EverOccurred)];

    for (position, name) in POSITIONS {
        features.push(Feature::new(p(name), FeatureKind::Value(position)));
    }
    for (position, name) in POSITIONS {
        for class in CATEGORY_CLASSES {
            features.push(Feature::new(
                p(&format!("{name}_{class}")),
                FeatureKind::Category(position, class),
            ));
        }
    }

    features.extend([
        Feature::new(p("days_since_last_value"), FeatureKind::DaysSince(Position::Last)),
        Feature::new(p("new_event_ordered"), FeatureKind::NewEventOrdered),
        Feature::new(p("days_since_last_change"), FeatureKind::DaysSinceLastChange),
        Feature::new(p("count_different_values"), FeatureKind::CountDifferentValues),
        Feature::new(p("event_frequency_variation"), FeatureKind::EventFrequencyVariation),
        Feature::new(p("baseline_value"), FeatureKind::Baseline),
        Feature::new(p("apex_value"), FeatureKind::Apex),
        Feature::new(p("nadir_value"), FeatureKind::Nadir),
    ]);

    for (to, from, name) in POSITION_PAIRS {
        features.push(Feature::new(
            p(&format!("diff_between_{name}")),
            FeatureKind::Difference(to, from),
        ));
    }
    for (to, from, name) in POSITION_PAIRS {
        features.push(Feature::new(
            p(&format!("percentage_change_between_{name}")),
            FeatureKind::PercentageChange(to, from),
        ));
    }
    for (to, from, name) in POSITION_PAIRS {
        features.push(Feature::new(
            p(&format!("slope_between_{name}")),
            FeatureKind::Slope(to, from),
        ));
    }
    for (reference, name) in REFERENCES {
        features.push(Feature::new(
            p(&format!("diff_between_last_{name}")),
            FeatureKind::DifferenceFrom(reference),
        ));
    }
    for (reference, name) in REFERENCES {
        features.push(Feature::new(
            p(&format!("percentage_change_between_last_{name}")),
            FeatureKind::PercentageChangeFrom(reference),
        ));
    }
    for (extreme, name) in EXTREMES {
        features.push(Feature::new(
            p(&format!("slope_between_last_{name}")),
            FeatureKind::SlopeTo(extreme),
        ));
    }
    for target in FlagTarget::ALL {
        features.push(Feature::new(
            p(&format!("flag_is_{}", target.label())),
            FeatureKind::FlagIs(target),
        ));
    }

    features.extend([
        Feature::new(p("inverse_days_since_last_value"), FeatureKind::InverseDays),
        Feature::new(p("abs_slope_between_last_second_last"), FeatureKind::AbsSlope),
        Feature::new(p("max_30_hr"), FeatureKind::Max30Hr),
        Feature::new(p("min_30_hr"), FeatureKind::Min30Hr),
        Feature::new(p("mean_30_hr"), FeatureKind::Mean30Hr),
    ]);

    features
}

fn med_features() -> Vec<Feature> {
    let p = |name: &str| format!("med-{name}");
    vec![
        Feature::new(p("ever_occurred"), FeatureKind::EverOccurred),
        Feature::new(p("days_since_last_value"), FeatureKind::DaysSince(Position::Last)),
        Feature::new(p("days_since_last_change"), FeatureKind::DaysSinceLastChange),
        Feature::new(p("event_frequency_variation"), FeatureKind::EventFrequencyVariation),
        Feature::new(p("days_since_first_value"), FeatureKind::DaysSince(Position::First)),
        Feature::new(p("event_is_ongoing"), FeatureKind::EventIsOngoing),
        Feature::new(p("count_sequential_days_of_event"), FeatureKind::CountSequentialDays),
        Feature::new(p("recency_of_sequential_days"), FeatureKind::RecencyOfSequentialDays),
        Feature::new(p("inverse_days_since_last_value"), FeatureKind::InverseDays),
    ]
}

/// Occurrence and recency features shared by procedures and microbiology.
fn order_features(prefix: &str) -> Vec<Feature> {
    let p = |name: &str| format!("{prefix}-{name}");
    vec![
        Feature::new(p("ever_occurred"), FeatureKind::EverOccurred),
        Feature::new(p("days_since_last_value"), FeatureKind::DaysSince(Position::Last)),
        Feature::new(p("days_since_first_value"), FeatureKind::DaysSince(Position::First)),
        Feature::new(p("inverse_days_since_last_value"), FeatureKind::InverseDays),
    ]
}

pub fn group_features(group: VariableGroup) -> Vec<Feature> {
    match group {
        VariableGroup::Root => root_features(),
        VariableGroup::Med => med_features(),
        VariableGroup::Procedure | VariableGroup::Micro => order_features(group.as_str()),
        VariableGroup::Io => vec![
            Feature::new("daily_io_features", FeatureKind::DailyIo),
            Feature::new("los_io_features", FeatureKind::LosIo),
        ],
        VariableGroup::Demo => vec![Feature::new("demo_features", FeatureKind::Demographic)],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSchema {
    pub group: VariableGroup,
    pub columns: Vec<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub groups: Vec<GroupSchema>,
}

impl FeatureSchema {
    pub fn group(&self, group: VariableGroup) -> Option<&GroupSchema> {
        self.groups.iter().find(|g| g.group == group)
    }

    pub fn feature_file_count(&self) -> usize {
        self.groups.iter().map(|g| g.features.len()).sum()
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub fn build_feature_schema(catalog: &VariableCatalog) -> FeatureSchema {
    let groups: Vec<GroupSchema> = VariableGroup::ALL
        .into_iter()
        .map(|group| GroupSchema {
            group,
            columns: catalog.columns(group).to_vec(),
            features: group_features(group).into_iter().map(|f| f.name).collect(),
        })
        .collect();

    let fingerprint = schema_fingerprint(catalog, &groups);

    info!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        feature_files = groups.iter().map(|g| g.features.len()).sum::<usize>(),
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        groups,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(catalog: &VariableCatalog, groups: &[GroupSchema]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    for group in groups {
        hasher.update(format!("group:{};columns:", group.group.as_str()));
        for column in &group.columns {
            hasher.update(column.as_bytes());
            if group.group == VariableGroup::Root {
                let data_type = catalog
                    .root_data_types
                    .get(column)
                    .map(|dt| dt.as_str())
                    .unwrap_or("unknown");
                hasher.update(format!(":{data_type}"));
            }
            hasher.update(",");
        }
        hasher.update(";features:");
        for feature in &group.features {
            hasher.update(feature.as_bytes());
            hasher.update(",");
        }
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn catalog() -> VariableCatalog {
        let mut catalog = VariableCatalog {
            root_order: vec!["GLU".to_string(), "UCOLOR".to_string()],
            med_order: vec!["heparin".to_string()],
            io_order: vec!["urine".to_string()],
            demo_order: vec!["age".to_string()],
            ..VariableCatalog::default()
        };
        catalog
            .root_data_types
            .insert("GLU".to_string(), DataType::Interval);
        catalog
            .root_data_types
            .insert("UCOLOR".to_string(), DataType::Ordinal);
        catalog
    }

    #[test]
    fn catalogue_sizes_and_order_are_fixed() {
        let root = group_features(VariableGroup::Root);
        assert_eq!(root.len(), 47);
        assert_eq!(root[0].name, "root-ever_occurred");
        assert_eq!(root[1].name, "root-last_value");
        assert_eq!(root[4].name, "root-last_value_1");
        assert_eq!(root[15].name, "root-first_value_4");
        assert_eq!(root[16].name, "root-days_since_last_value");
        assert_eq!(root[42].name, "root-inverse_days_since_last_value");
        assert_eq!(root[46].name, "root-mean_30_hr");
        assert!(root.iter().any(|f| f.name == "root-flag_is_null"));

        assert_eq!(group_features(VariableGroup::Med).len(), 9);
        assert_eq!(group_features(VariableGroup::Procedure)[0].name, "procedure-ever_occurred");
        assert_eq!(group_features(VariableGroup::Micro)[3].name, "micro-inverse_days_since_last_value");
        assert_eq!(group_features(VariableGroup::Io)[1].file_name(), "los_io_features.txt");
        assert_eq!(group_features(VariableGroup::Demo).len(), 1);
    }

    #[test]
    fn feature_names_are_unique_across_groups() {
        let mut seen = HashSet::new();
        for group in VariableGroup::ALL {
            for feature in group_features(group) {
                assert!(seen.insert(feature.name.clone()), "duplicate {}", feature.name);
            }
        }
    }

    #[test]
    fn schema_fingerprint_is_deterministic_and_order_sensitive() {
        let a = build_feature_schema(&catalog());
        let b = build_feature_schema(&catalog());
        assert_eq!(a, b);
        assert_eq!(a.version, FEATURE_SCHEMA_VERSION);
        assert_eq!(a.feature_file_count(), 47 + 9 + 4 + 4 + 2 + 1);

        let mut reordered = catalog();
        reordered.root_order.reverse();
        assert_ne!(build_feature_schema(&reordered).fingerprint, a.fingerprint);

        let mut retyped = catalog();
        retyped
            .root_data_types
            .insert("UCOLOR".to_string(), DataType::Nominal);
        assert_ne!(build_feature_schema(&retyped).fingerprint, a.fingerprint);
    }

    #[test]
    fn schema_compatibility_checks_version_and_fingerprint() {
        let schema = build_feature_schema(&catalog());
        assert_schema_compatible(FEATURE_SCHEMA_VERSION, &schema.fingerprint, &schema).unwrap();
        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &schema.fingerprint, &schema),
            Err(SchemaError::VersionMismatch { .. })
        ));
        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION, "not-real", &schema),
            Err(SchemaError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn evaluate_routes_pre_and_post_windows() {
        let events = vec![Event::new(1_000, 4.0), Event::new(90_000_000, 6.0)];
        let window = Window {
            pre: &events[..1],
            post: &events[1..],
        };
        let table = CategoryTable::default();
        let ctx = VariableContext {
            window,
            flags: &[],
            data_type: DataType::Interval,
            categories: &table,
            source_table: None,
            flagged_table: "lab_739",
            cutoff_seconds: 86_400.0,
            prior_cutoffs: &[],
            attribute: None,
        };

        assert_eq!(FeatureKind::Value(Position::Last).evaluate(&ctx), "4");
        assert_eq!(FeatureKind::NewEventOrdered.evaluate(&ctx), "1");
        assert_eq!(FeatureKind::FlagIs(FlagTarget::Null).evaluate(&ctx), "0");
        assert_eq!(FeatureKind::Demographic.evaluate(&ctx), "");

        let age = Value::Number(64.0);
        let demo_ctx = VariableContext {
            attribute: Some(&age),
            ..ctx
        };
        assert_eq!(FeatureKind::Demographic.evaluate(&demo_ctx), "64");
    }
}
