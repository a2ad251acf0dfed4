//! Discrete-result category tables and lab flag resolution.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::event::{FlagEvent, Value};

/// Number of ranked buckets in a discrete-result mapping entry.
pub const CATEGORY_BUCKETS: usize = 4;

/// Per-variable buckets of result texts; bucket `i` maps to class `i + 1`.
pub type DiscreteResultMapping = BTreeMap<String, Vec<Vec<String>>>;

/// Flattened `text -> class id (1..=4)` lookup for one variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTable {
    classes: HashMap<String, u8>,
}

impl CategoryTable {
    /// Flattens the buckets of `root`. Variables absent from the mapping get
    /// an empty table, so every lookup misses. A text listed in several
    /// buckets resolves to the last one.
    pub fn resolve(root: &str, mapping: &DiscreteResultMapping) -> Self {
        let mut classes = HashMap::new();
        if let Some(buckets) = mapping.get(root) {
            for (bucket, texts) in buckets.iter().take(CATEGORY_BUCKETS).enumerate() {
                for text in texts {
                    classes.insert(text.clone(), bucket as u8 + 1);
                }
            }
        }
        Self { classes }
    }

    pub fn class_of(&self, value: &Value) -> Option<u8> {
        value
            .as_text()
            .and_then(|text| self.classes.get(text).copied())
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.class_of(value).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }
}

impl<const N: usize> From<[(&str, u8); N]> for CategoryTable {
    fn from(entries: [(&str, u8); N]) -> Self {
        Self {
            classes: entries
                .into_iter()
                .map(|(text, class)| (text.to_string(), class))
                .collect(),
        }
    }
}

/// Abnormality flags tracked as separate feature columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagTarget {
    Null,
    High,
    Low,
    Abnormal,
}

impl FlagTarget {
    pub const ALL: [FlagTarget; 4] = [Self::Null, Self::High, Self::Low, Self::Abnormal];

    pub fn code(self) -> Option<&'static str> {
        match self {
            Self::Null => None,
            Self::High => Some("H"),
            Self::Low => Some("L"),
            Self::Abnormal => Some("A"),
        }
    }

    pub fn label(self) -> &'static str {
        self.code().unwrap_or("null")
    }
}

/// `'1'` when the most recent flag equals `target`, `'0'` otherwise.
///
/// Only variables sourced from `flagged_table` carry meaningful flags; every
/// other source table resolves to `'0'` whatever the flag content.
pub fn flag_is(
    flags: &[FlagEvent],
    source_table: Option<&str>,
    flagged_table: &str,
    target: FlagTarget,
) -> String {
    if source_table != Some(flagged_table) {
        return "0".to_string();
    }
    match flags.last() {
        Some(last) if last.flag.as_deref() == target.code() => "1".to_string(),
        _ => "0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> DiscreteResultMapping {
        let mut mapping = DiscreteResultMapping::new();
        mapping.insert(
            "UCOLOR".to_string(),
            vec![
                vec!["CLEAR".to_string()],
                vec!["YELLOW".to_string(), "AMBER".to_string()],
                vec![],
                vec!["RED".to_string(), "CLEAR".to_string()],
            ],
        );
        mapping
    }

    #[test]
    fn buckets_flatten_to_one_based_classes() {
        let table = CategoryTable::resolve("UCOLOR", &mapping());
        assert_eq!(table.class_of(&Value::from("YELLOW")), Some(2));
        assert_eq!(table.class_of(&Value::from("AMBER")), Some(2));
        assert_eq!(table.class_of(&Value::from("RED")), Some(4));
        assert_eq!(table.class_of(&Value::from("BLUE")), None);
    }

    #[test]
    fn later_bucket_wins_for_repeated_text() {
        let table = CategoryTable::resolve("UCOLOR", &mapping());
        assert_eq!(table.class_of(&Value::from("CLEAR")), Some(4));
    }

    #[test]
    fn unmapped_variable_yields_empty_table() {
        let table = CategoryTable::resolve("GLU", &mapping());
        assert!(table.is_empty());
        assert!(!table.contains(&Value::from("CLEAR")));
    }

    #[test]
    fn numeric_values_never_match_text_keys() {
        let table = CategoryTable::from([("1", 1)]);
        assert!(!table.contains(&Value::Number(1.0)));
        assert!(table.contains(&Value::from("1")));
    }

    #[test]
    fn flag_is_reads_most_recent_flag_only_for_flagged_table() {
        let flags = vec![FlagEvent::new(1_000, Some("L")), FlagEvent::new(2_000, Some("H"))];

        assert_eq!(flag_is(&flags, Some("lab_739"), "lab_739", FlagTarget::High), "1");
        assert_eq!(flag_is(&flags, Some("lab_739"), "lab_739", FlagTarget::Low), "0");
        assert_eq!(flag_is(&flags, Some("vitals"), "lab_739", FlagTarget::High), "0");
        assert_eq!(flag_is(&flags, None, "lab_739", FlagTarget::High), "0");
    }

    #[test]
    fn null_flag_matches_null_target() {
        let flags = vec![FlagEvent::new(1_000, Some("H")), FlagEvent::new(2_000, None)];
        assert_eq!(flag_is(&flags, Some("lab_739"), "lab_739", FlagTarget::Null), "1");
        assert_eq!(flag_is(&[], Some("lab_739"), "lab_739", FlagTarget::Null), "0");
    }
}
