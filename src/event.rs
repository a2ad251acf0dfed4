//! Event-stream data model shared by every variable group.
//!
//! Streams are owned by the store collaborator and arrive sorted ascending by
//! timestamp. Nothing in this crate re-sorts or re-validates that order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MS_PER_SECOND: f64 = 1_000.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Raw measurement or order value: numeric for interval data, text for coded
/// results. Stores may also hold booleans (demographic flags) and nulls
/// (unrecorded results); both are non-numeric and match no category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Booleans keep the capitalised spelling existing feature files carry.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Text(t) => f.write_str(t),
            Self::Null => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Anything positioned on the millisecond time axis.
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;

    fn seconds(&self) -> f64 {
        self.timestamp_ms() as f64 / MS_PER_SECOND
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(i64, Value)", into = "(i64, Value)")]
pub struct Event {
    pub timestamp_ms: i64,
    pub value: Value,
}

impl Event {
    pub fn new(timestamp_ms: i64, value: impl Into<Value>) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
        }
    }
}

impl Timestamped for Event {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl From<(i64, Value)> for Event {
    fn from((timestamp_ms, value): (i64, Value)) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

impl From<Event> for (i64, Value) {
    fn from(event: Event) -> Self {
        (event.timestamp_ms, event.value)
    }
}

/// Lab abnormality marker stored parallel to the value stream. `None` is the null flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i64, Option<String>)", into = "(i64, Option<String>)")]
pub struct FlagEvent {
    pub timestamp_ms: i64,
    pub flag: Option<String>,
}

impl FlagEvent {
    pub fn new(timestamp_ms: i64, flag: Option<&str>) -> Self {
        Self {
            timestamp_ms,
            flag: flag.map(str::to_string),
        }
    }
}

impl Timestamped for FlagEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl From<(i64, Option<String>)> for FlagEvent {
    fn from((timestamp_ms, flag): (i64, Option<String>)) -> Self {
        Self { timestamp_ms, flag }
    }
}

impl From<FlagEvent> for (i64, Option<String>) {
    fn from(event: FlagEvent) -> Self {
        (event.timestamp_ms, event.flag)
    }
}

/// Measurement scale of a variable; decides which operators produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Interval,
    Ordinal,
    Nominal,
    Binary,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Ordinal => "ordinal",
            Self::Nominal => "nominal",
            Self::Binary => "binary",
        }
    }

    /// Numeric aggregates, comparisons and trends are only defined on interval data.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Interval)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown data type: {0}")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(Self::Interval),
            "ordinal" => Ok(Self::Ordinal),
            "nominal" => Ok(Self::Nominal),
            "binary" => Ok(Self::Binary),
            _ => Err(UnknownDataType(raw.to_string())),
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = UnknownDataType;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.as_str().to_string()
    }
}

/// Renders a scalar the way every feature file stores it.
pub fn format_number(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_deserialize_from_pairs() {
        let events: Vec<Event> =
            serde_json::from_str(r#"[[1000, 10], [2000, "POS"], [3000, 9.5]]"#).unwrap();

        assert_eq!(events[0], Event::new(1_000, 10.0));
        assert_eq!(events[1].value, Value::Text("POS".to_string()));
        assert_eq!(events[2].value.as_number(), Some(9.5));
        assert_eq!(events[2].seconds(), 3.0);
    }

    #[test]
    fn booleans_and_nulls_are_non_numeric_values() {
        let events: Vec<Event> =
            serde_json::from_str(r#"[[1000, true], [2000, null], [3000, "null"]]"#).unwrap();

        assert_eq!(events[0].value, Value::Bool(true));
        assert_eq!(events[0].value.to_string(), "True");
        assert!(events[1].value.is_null());
        assert_eq!(events[1].value.to_string(), "");
        assert_eq!(events[2].value.as_text(), Some("null"));
        assert!(events.iter().take(2).all(|e| e.value.as_number().is_none()));
    }

    #[test]
    fn flags_deserialize_with_null() {
        let flags: Vec<FlagEvent> = serde_json::from_str(r#"[[1000, null], [2000, "H"]]"#).unwrap();
        assert_eq!(flags[0].flag, None);
        assert_eq!(flags[1].flag.as_deref(), Some("H"));
    }

    #[test]
    fn data_type_parsing_tolerates_whitespace_and_case() {
        assert_eq!("ordinal ".parse::<DataType>().unwrap(), DataType::Ordinal);
        assert_eq!("Binary".parse::<DataType>().unwrap(), DataType::Binary);
        assert!("ratio".parse::<DataType>().is_err());
        assert!(DataType::Interval.is_numeric());
        assert!(!DataType::Nominal.is_numeric());
    }

    #[test]
    fn numbers_render_without_trailing_zero_fraction() {
        assert_eq!(format_number(9.0), "9");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(Value::Text("1+".to_string()).to_string(), "1+");
    }
}
