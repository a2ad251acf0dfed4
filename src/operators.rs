//! Feature operators over one variable's (windowed) event stream.
//!
//! Every operator is a pure function returning the stringified scalar written
//! to a feature file. "Not computable" is a sentinel, never an error: the
//! empty string for most families, `"0"` where noted. Consumers must read both
//! sentinels as missing values.

use std::collections::HashSet;

use crate::category::CategoryTable;
use crate::event::{
    format_number, DataType, Event, Timestamped, Value, MS_PER_SECOND, SECONDS_PER_DAY,
};

/// 30 hours expressed in day units.
pub const WINDOW_30_HR_DAYS: f64 = 1.25;
/// Exact age of the daily intake/output total at the cutoff.
pub const DAILY_IO_AGE_SECONDS: f64 = 28_800.0;

/// Index into a sorted stream, counted from either end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    First,
    Last,
    SecondToLast,
}

impl Position {
    pub fn index(self, len: usize) -> Option<usize> {
        match self {
            Self::First => (len > 0).then_some(0),
            Self::Last => len.checked_sub(1),
            Self::SecondToLast => len.checked_sub(2),
        }
    }

    pub fn pick(self, stream: &[Event]) -> Option<&Event> {
        self.index(stream.len()).map(|idx| &stream[idx])
    }
}

/// Summary value the last observation is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    Baseline,
    Apex,
    Nadir,
}

/// Extreme observation; ties go to the most recent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extreme {
    Apex,
    Nadir,
}

fn missing() -> String {
    String::new()
}

fn zero() -> String {
    "0".to_string()
}

fn ms_to_days(ms: f64) -> f64 {
    ms / MS_PER_SECOND / SECONDS_PER_DAY
}

/// `(timestamp_ms, number)` pairs, or `None` when any value is non-numeric.
fn numeric(stream: &[Event]) -> Option<Vec<(i64, f64)>> {
    stream
        .iter()
        .map(|event| event.value.as_number().map(|n| (event.timestamp_ms, n)))
        .collect()
}

fn numeric_at(stream: &[Event], position: Position) -> Option<(i64, f64)> {
    let event = position.pick(stream)?;
    Some((event.timestamp_ms, event.value.as_number()?))
}

fn age_days(event: &Event, cutoff_seconds: f64) -> f64 {
    (cutoff_seconds - event.seconds()) / SECONDS_PER_DAY
}

pub fn ever_occurred(stream: &[Event]) -> String {
    if stream.is_empty() {
        zero()
    } else {
        "1".to_string()
    }
}

/// Value at `position`: raw for interval, class id for ordinal, and the
/// complementary membership code for binary (`"0"` when the text is a known
/// category, `"1"` otherwise). Nominal values are emitted only through
/// [`category_at`].
pub fn value_at(
    stream: &[Event],
    position: Position,
    table: &CategoryTable,
    data_type: DataType,
) -> String {
    let Some(event) = position.pick(stream) else {
        return missing();
    };
    match data_type {
        DataType::Interval => event.value.to_string(),
        DataType::Ordinal => table
            .class_of(&event.value)
            .map(|class| class.to_string())
            .unwrap_or_default(),
        DataType::Binary => {
            if table.contains(&event.value) {
                zero()
            } else {
                "1".to_string()
            }
        }
        DataType::Nominal => missing(),
    }
}

/// One-hot flag for nominal class `class` at `position`; `"0"` for anything else.
pub fn category_at(
    stream: &[Event],
    position: Position,
    table: &CategoryTable,
    class: u8,
    data_type: DataType,
) -> String {
    if data_type != DataType::Nominal {
        return zero();
    }
    match position.pick(stream) {
        Some(event) if table.class_of(&event.value) == Some(class) => "1".to_string(),
        _ => zero(),
    }
}

fn days_since_index(stream: &[Event], cutoff_seconds: f64, idx: usize) -> String {
    stream
        .get(idx)
        .map(|event| format_number(age_days(event, cutoff_seconds)))
        .unwrap_or_default()
}

pub fn days_since(stream: &[Event], cutoff_seconds: f64, position: Position) -> String {
    match position.index(stream.len()) {
        Some(idx) => days_since_index(stream, cutoff_seconds, idx),
        None => missing(),
    }
}

/// Age of the first event of the trailing run of identical values.
///
/// A stream that never changes value has no change point and yields `""`.
pub fn days_since_last_change(stream: &[Event], cutoff_seconds: f64) -> String {
    let Some(last) = stream.last() else {
        return missing();
    };
    stream
        .iter()
        .rposition(|event| event.value != last.value)
        .map(|changed| days_since_index(stream, cutoff_seconds, changed + 1))
        .unwrap_or_default()
}

#[derive(PartialEq, Eq, Hash)]
enum DistinctKey<'a> {
    Number(u64),
    Bool(bool),
    Text(&'a str),
    Null,
}

pub fn count_different_values(stream: &[Event]) -> String {
    let distinct: HashSet<DistinctKey<'_>> = stream
        .iter()
        .map(|event| match &event.value {
            // -0.0 and 0.0 are the same observation
            Value::Number(n) => {
                DistinctKey::Number(if *n == 0.0 { 0.0_f64.to_bits() } else { n.to_bits() })
            }
            Value::Bool(b) => DistinctKey::Bool(*b),
            Value::Text(t) => DistinctKey::Text(t),
            Value::Null => DistinctKey::Null,
        })
        .collect();
    distinct.len().to_string()
}

/// Mean offset of each event from the first, divided by the ratio of the two
/// most recent raw timestamps, in days.
///
/// The divisor is `t[-1] / t[-2]`, a ratio of absolute timestamps rather than
/// a gap. This reproduces the historical feature definition exactly.
pub fn event_frequency_variation(stream: &[Event]) -> String {
    if stream.len() < 2 {
        return missing();
    }
    let first = stream[0].timestamp_ms as f64;
    let offsets: Vec<f64> = stream[1..]
        .iter()
        .map(|event| event.timestamp_ms as f64 - first)
        .collect();
    let average = offsets.iter().sum::<f64>() / offsets.len() as f64;

    let last = stream[stream.len() - 1].timestamp_ms as f64;
    let second_last = stream[stream.len() - 2].timestamp_ms as f64;
    if second_last == 0.0 || last == 0.0 {
        return missing();
    }
    format_number(ms_to_days(average / (last / second_last)))
}

fn baseline_number(stream: &[Event]) -> Option<f64> {
    let values = numeric(stream)?;
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64)
}

fn extreme_point(stream: &[Event], extreme: Extreme) -> Option<(i64, f64)> {
    let values = numeric(stream)?;
    let mut iter = values.into_iter().rev();
    let mut best = iter.next()?;
    for candidate in iter {
        let better = match extreme {
            Extreme::Apex => candidate.1 > best.1,
            Extreme::Nadir => candidate.1 < best.1,
        };
        if better {
            best = candidate;
        }
    }
    Some(best)
}

fn reference_number(stream: &[Event], reference: Reference) -> Option<f64> {
    match reference {
        Reference::Baseline => baseline_number(stream),
        Reference::Apex => extreme_point(stream, Extreme::Apex).map(|(_, v)| v),
        Reference::Nadir => extreme_point(stream, Extreme::Nadir).map(|(_, v)| v),
    }
}

pub fn baseline(stream: &[Event], data_type: DataType) -> String {
    if !data_type.is_numeric() {
        return missing();
    }
    baseline_number(stream).map(format_number).unwrap_or_default()
}

/// Maximum (`Apex`) or minimum (`Nadir`) observation as `(timestamp_ms, value)`.
pub fn extreme_event(stream: &[Event], extreme: Extreme, data_type: DataType) -> Option<(i64, f64)> {
    if !data_type.is_numeric() {
        return None;
    }
    extreme_point(stream, extreme)
}

pub fn apex(stream: &[Event], data_type: DataType) -> String {
    extreme_event(stream, Extreme::Apex, data_type)
        .map(|(_, v)| format_number(v))
        .unwrap_or_default()
}

pub fn nadir(stream: &[Event], data_type: DataType) -> String {
    extreme_event(stream, Extreme::Nadir, data_type)
        .map(|(_, v)| format_number(v))
        .unwrap_or_default()
}

fn position_pair(
    stream: &[Event],
    data_type: DataType,
    to: Position,
    from: Position,
) -> Option<((i64, f64), (i64, f64))> {
    if !data_type.is_numeric() || stream.len() < 2 {
        return None;
    }
    Some((numeric_at(stream, to)?, numeric_at(stream, from)?))
}

pub fn difference(stream: &[Event], to: Position, from: Position, data_type: DataType) -> String {
    position_pair(stream, data_type, to, from)
        .map(|((_, a), (_, b))| format_number(a - b))
        .unwrap_or_default()
}

/// Signed percentage change from `from` to `to`; `""` when `from` is zero.
pub fn percentage_change(
    stream: &[Event],
    to: Position,
    from: Position,
    data_type: DataType,
) -> String {
    match position_pair(stream, data_type, to, from) {
        Some(((_, a), (_, b))) if b != 0.0 => format_number((a - b) / b * 100.0),
        _ => missing(),
    }
}

/// Rise over run between two positions, run in days.
pub fn slope(stream: &[Event], to: Position, from: Position, data_type: DataType) -> String {
    let Some(((ta, a), (tb, b))) = position_pair(stream, data_type, to, from) else {
        return missing();
    };
    let run = ms_to_days((ta - tb) as f64);
    if run == 0.0 {
        return missing();
    }
    format_number((a - b) / run)
}

fn last_and_reference(
    stream: &[Event],
    reference: Reference,
    data_type: DataType,
) -> Option<(f64, f64)> {
    if !data_type.is_numeric() {
        return None;
    }
    let (_, last) = numeric_at(stream, Position::Last)?;
    Some((last, reference_number(stream, reference)?))
}

pub fn difference_from(stream: &[Event], reference: Reference, data_type: DataType) -> String {
    last_and_reference(stream, reference, data_type)
        .map(|(last, value)| format_number(last - value))
        .unwrap_or_default()
}

pub fn percentage_change_from(
    stream: &[Event],
    reference: Reference,
    data_type: DataType,
) -> String {
    match last_and_reference(stream, reference, data_type) {
        Some((last, value)) if value != 0.0 => format_number((last - value) / value * 100.0),
        _ => missing(),
    }
}

/// Slope from the extreme observation to the last one; `""` when they coincide in time.
pub fn slope_to(stream: &[Event], extreme: Extreme, data_type: DataType) -> String {
    let Some((t_last, last)) = numeric_at(stream, Position::Last) else {
        return missing();
    };
    let Some((t_ext, value)) = extreme_event(stream, extreme, data_type) else {
        return missing();
    };
    let run = ms_to_days((t_last - t_ext) as f64);
    if run == 0.0 {
        return missing();
    }
    format_number((last - value) / run)
}

/// `"1"` when the last event is less than a day old and the following day
/// has at least one event, i.e. a standing order that is still in effect.
pub fn event_is_ongoing(pre: &[Event], post: &[Event], cutoff_seconds: f64) -> String {
    match pre.last() {
        Some(last) => {
            let days = age_days(last, cutoff_seconds);
            if days > 0.0 && days < 1.0 && !post.is_empty() {
                "1".to_string()
            } else {
                zero()
            }
        }
        None => zero(),
    }
}

fn sequential_days(stream: &[Event], prior_cutoffs: &[f64]) -> usize {
    let mut count = 0;
    for day in (1..prior_cutoffs.len()).rev() {
        let (start, end) = (prior_cutoffs[day - 1], prior_cutoffs[day]);
        let found = stream.iter().any(|event| {
            let t = event.seconds();
            start < t && t < end
        });
        if !found {
            break;
        }
        count += 1;
    }
    count
}

/// Consecutive days with an event, walking back from the most recent prior cutoff.
pub fn count_sequential_days(stream: &[Event], prior_cutoffs: &[f64]) -> String {
    sequential_days(stream, prior_cutoffs).to_string()
}

/// `1 / sqrt(count)` of [`count_sequential_days`], `0` when the count is zero.
pub fn recency_of_sequential_days(stream: &[Event], prior_cutoffs: &[f64]) -> String {
    let count = sequential_days(stream, prior_cutoffs);
    if count == 0 {
        return format_number(0.0);
    }
    format_number(1.0 / (count as f64).sqrt())
}

fn values_within_30_hr(stream: &[Event], cutoff_seconds: f64) -> Option<Vec<f64>> {
    let values: Vec<f64> = stream
        .iter()
        .filter(|event| age_days(event, cutoff_seconds) <= WINDOW_30_HR_DAYS)
        .map(|event| event.value.as_number())
        .collect::<Option<_>>()?;
    (!values.is_empty()).then_some(values)
}

pub fn max_30_hr(stream: &[Event], cutoff_seconds: f64, data_type: DataType) -> String {
    if !data_type.is_numeric() {
        return missing();
    }
    values_within_30_hr(stream, cutoff_seconds)
        .map(|values| format_number(values.into_iter().fold(f64::MIN, f64::max)))
        .unwrap_or_default()
}

pub fn min_30_hr(stream: &[Event], cutoff_seconds: f64, data_type: DataType) -> String {
    if !data_type.is_numeric() {
        return missing();
    }
    values_within_30_hr(stream, cutoff_seconds)
        .map(|values| format_number(values.into_iter().fold(f64::MAX, f64::min)))
        .unwrap_or_default()
}

pub fn mean_30_hr(stream: &[Event], cutoff_seconds: f64, data_type: DataType) -> String {
    if !data_type.is_numeric() {
        return missing();
    }
    values_within_30_hr(stream, cutoff_seconds)
        .map(|values| format_number(values.iter().sum::<f64>() / values.len() as f64))
        .unwrap_or_default()
}

/// Last value when it is exactly eight hours old at the cutoff, `"0"` otherwise.
///
/// The match is exact equality, not a window. Streams with no event at that
/// precise offset always report `"0"`.
pub fn daily_io(stream: &[Event], cutoff_seconds: f64) -> String {
    let Some(last) = stream.last() else {
        return missing();
    };
    if cutoff_seconds - last.seconds() == DAILY_IO_AGE_SECONDS {
        last.value.to_string()
    } else {
        zero()
    }
}

/// Net sum over the whole window; `"0"` when empty.
pub fn los_io(stream: &[Event]) -> String {
    if stream.is_empty() {
        return zero();
    }
    numeric(stream)
        .map(|values| format_number(values.iter().map(|(_, v)| v).sum::<f64>()))
        .unwrap_or_default()
}

/// `1 / max(days since last event, 1)`; `"0"` when nothing happened yet.
pub fn inverse_days(stream: &[Event], cutoff_seconds: f64) -> String {
    match stream.last() {
        Some(last) => format_number(1.0 / age_days(last, cutoff_seconds).max(1.0)),
        None => zero(),
    }
}

/// `|last - second_last| / days_between`; `"0"` when not computable.
pub fn abs_slope(stream: &[Event], data_type: DataType) -> String {
    let Some(((ta, a), (tb, b))) =
        position_pair(stream, data_type, Position::Last, Position::SecondToLast)
    else {
        return zero();
    };
    let run = ms_to_days((ta - tb) as f64);
    if run == 0.0 {
        return zero();
    }
    format_number(((a - b) / run).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Value;

    const DAY_MS: i64 = 86_400_000;

    fn stream(points: &[(i64, f64)]) -> Vec<Event> {
        points.iter().map(|&(t, v)| Event::new(t, v)).collect()
    }

    fn text_stream(points: &[(i64, &str)]) -> Vec<Event> {
        points.iter().map(|&(t, v)| Event::new(t, v)).collect()
    }

    fn parse(raw: &str) -> f64 {
        raw.parse().expect("numeric feature")
    }

    fn assert_close(actual: &str, expected: f64) {
        let actual = parse(actual);
        assert!(
            (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
            "actual={actual} expected={expected}"
        );
    }

    #[test]
    fn ever_occurred_reports_presence() {
        assert_eq!(ever_occurred(&[]), "0");
        assert_eq!(ever_occurred(&stream(&[(1, 1.0)])), "1");
    }

    #[test]
    fn value_at_resolves_by_data_type() {
        let table = CategoryTable::from([("NEG", 1), ("POS", 3)]);
        let coded = text_stream(&[(1, "NEG"), (2, "POS"), (3, "TRACE")]);

        assert_eq!(value_at(&coded, Position::First, &table, DataType::Ordinal), "1");
        assert_eq!(value_at(&coded, Position::SecondToLast, &table, DataType::Ordinal), "3");
        assert_eq!(value_at(&coded, Position::Last, &table, DataType::Ordinal), "");
        assert_eq!(value_at(&coded, Position::First, &table, DataType::Binary), "0");
        assert_eq!(value_at(&coded, Position::Last, &table, DataType::Binary), "1");
        assert_eq!(value_at(&coded, Position::Last, &table, DataType::Nominal), "");
        assert_eq!(value_at(&coded, Position::Last, &table, DataType::Interval), "TRACE");
    }

    #[test]
    fn value_at_missing_position_is_empty() {
        let table = CategoryTable::default();
        let single = stream(&[(1, 4.0)]);
        assert_eq!(value_at(&single, Position::SecondToLast, &table, DataType::Interval), "");
        assert_eq!(value_at(&[], Position::Last, &table, DataType::Binary), "");
    }

    #[test]
    fn category_at_only_flags_nominal() {
        let table = CategoryTable::from([("GRAM+", 2), ("GRAM-", 3)]);
        let coded = text_stream(&[(1, "GRAM-"), (2, "GRAM+")]);

        assert_eq!(category_at(&coded, Position::Last, &table, 2, DataType::Nominal), "1");
        assert_eq!(category_at(&coded, Position::Last, &table, 3, DataType::Nominal), "0");
        assert_eq!(category_at(&coded, Position::First, &table, 3, DataType::Nominal), "1");
        assert_eq!(category_at(&coded, Position::Last, &table, 2, DataType::Ordinal), "0");
        assert_eq!(category_at(&[], Position::Last, &table, 2, DataType::Nominal), "0");
    }

    #[test]
    fn days_since_uses_seconds_cutoff() {
        let s = stream(&[(0, 1.0), (DAY_MS, 2.0)]);
        let cutoff = 3.0 * 86_400.0;
        assert_eq!(days_since(&s, cutoff, Position::Last), "2");
        assert_eq!(days_since(&s, cutoff, Position::First), "3");
        assert_eq!(days_since(&[], cutoff, Position::Last), "");
    }

    #[test]
    fn days_since_last_change_reports_start_of_trailing_run() {
        let s = stream(&[(0, 5.0), (DAY_MS, 7.0), (2 * DAY_MS, 7.0)]);
        let cutoff = 4.0 * 86_400.0;
        assert_eq!(days_since_last_change(&s, cutoff), "3");

        let flat = stream(&[(0, 7.0), (DAY_MS, 7.0)]);
        assert_eq!(days_since_last_change(&flat, cutoff), "");
        assert_eq!(days_since_last_change(&[], cutoff), "");
    }

    #[test]
    fn count_different_values_mixes_numbers_and_text() {
        let mut s = stream(&[(1, 1.0), (2, 1.0), (3, 0.0), (4, -0.0)]);
        s.push(Event::new(5, "1"));
        assert_eq!(count_different_values(&s), "3");
        s.push(Event::new(6, Value::Null));
        s.push(Event::new(7, ""));
        s.push(Event::new(8, true));
        assert_eq!(count_different_values(&s), "6");
        assert_eq!(count_different_values(&[]), "0");
    }

    #[test]
    fn event_frequency_variation_divides_by_timestamp_ratio() {
        let s = stream(&[(1_000, 1.0), (2_000, 1.0), (4_000, 1.0)]);
        let average = (1_000.0 + 3_000.0) / 2.0;
        let expected = average / (4_000.0 / 2_000.0) / 1_000.0 / 86_400.0;
        assert_close(&event_frequency_variation(&s), expected);

        assert_eq!(event_frequency_variation(&stream(&[(1_000, 1.0)])), "");
        assert_eq!(event_frequency_variation(&stream(&[(0, 1.0), (1_000, 1.0)])), "");
    }

    #[test]
    fn central_tendency_is_interval_only() {
        let s = stream(&[(1, 2.0), (2, 4.0), (3, 9.0)]);
        assert_eq!(baseline(&s, DataType::Interval), "5");
        assert_eq!(apex(&s, DataType::Interval), "9");
        assert_eq!(nadir(&s, DataType::Interval), "2");
        assert_eq!(baseline(&s, DataType::Ordinal), "");
        assert_eq!(apex(&[], DataType::Interval), "");
    }

    #[test]
    fn extreme_ties_prefer_most_recent() {
        let s = stream(&[(1_000, 5.0), (2_000, 5.0)]);
        assert_eq!(
            extreme_event(&s, Extreme::Apex, DataType::Interval),
            Some((2_000, 5.0))
        );
        assert_eq!(
            extreme_event(&s, Extreme::Nadir, DataType::Interval),
            Some((2_000, 5.0))
        );

        let s = stream(&[(1_000, 9.0), (2_000, 3.0), (3_000, 9.0), (4_000, 3.0)]);
        assert_eq!(
            extreme_event(&s, Extreme::Apex, DataType::Interval),
            Some((3_000, 9.0))
        );
        assert_eq!(
            extreme_event(&s, Extreme::Nadir, DataType::Interval),
            Some((4_000, 3.0))
        );
    }

    #[test]
    fn pairwise_comparisons_between_positions() {
        let s = stream(&[(0, 10.0), (DAY_MS, 12.0), (3 * DAY_MS, 9.0)]);
        let dt = DataType::Interval;

        assert_eq!(difference(&s, Position::Last, Position::SecondToLast, dt), "-3");
        assert_eq!(difference(&s, Position::Last, Position::First, dt), "-1");
        assert_eq!(percentage_change(&s, Position::Last, Position::First, dt), "-10");
        assert_eq!(slope(&s, Position::Last, Position::SecondToLast, dt), "-1.5");
        assert_eq!(difference(&s[..1], Position::Last, Position::First, dt), "");
        assert_eq!(difference(&s, Position::Last, Position::First, DataType::Binary), "");
    }

    #[test]
    fn percentage_change_guards_zero_reference() {
        let s = stream(&[(0, 0.0), (DAY_MS, 3.0)]);
        assert_eq!(
            percentage_change(&s, Position::Last, Position::First, DataType::Interval),
            ""
        );
        let flat = stream(&[(0, 0.0), (DAY_MS, 0.0)]);
        assert_eq!(
            percentage_change_from(&flat, Reference::Baseline, DataType::Interval),
            ""
        );
    }

    #[test]
    fn slope_guards_zero_run() {
        let s = stream(&[(DAY_MS, 1.0), (DAY_MS, 4.0)]);
        assert_eq!(slope(&s, Position::Last, Position::First, DataType::Interval), "");
        assert_eq!(abs_slope(&s, DataType::Interval), "0");
    }

    #[test]
    fn comparisons_against_reference_values() {
        let s = stream(&[(0, 4.0), (DAY_MS, 10.0), (2 * DAY_MS, 7.0)]);
        let dt = DataType::Interval;

        assert_eq!(difference_from(&s, Reference::Baseline, dt), "0");
        assert_eq!(difference_from(&s, Reference::Apex, dt), "-3");
        assert_eq!(difference_from(&s, Reference::Nadir, dt), "3");
        assert_eq!(percentage_change_from(&s, Reference::Apex, dt), "-30");
        assert_eq!(percentage_change_from(&s, Reference::Nadir, dt), "75");
        assert_eq!(slope_to(&s, Extreme::Apex, dt), "-3");
        assert_eq!(slope_to(&s, Extreme::Nadir, dt), "1.5");
        assert_eq!(difference_from(&[], Reference::Baseline, dt), "");
    }

    #[test]
    fn slope_to_extreme_that_is_last_is_empty() {
        let s = stream(&[(0, 1.0), (DAY_MS, 8.0)]);
        assert_eq!(slope_to(&s, Extreme::Apex, DataType::Interval), "");
    }

    #[test]
    fn non_numeric_interval_values_are_not_computable() {
        let mut s = stream(&[(0, 1.0)]);
        s.push(Event {
            timestamp_ms: DAY_MS,
            value: Value::Text("see note".to_string()),
        });
        assert_eq!(baseline(&s, DataType::Interval), "");
        assert_eq!(difference(&s, Position::Last, Position::First, DataType::Interval), "");
        assert_eq!(abs_slope(&s, DataType::Interval), "0");
        assert_eq!(los_io(&s), "");
    }

    #[test]
    fn event_is_ongoing_needs_recent_event_and_future_event() {
        let cutoff = 10.0 * 86_400.0;
        let recent = stream(&[(9 * DAY_MS + DAY_MS / 2, 1.0)]);
        let stale = stream(&[(8 * DAY_MS, 1.0)]);
        let upcoming = stream(&[(10 * DAY_MS + 1_000, 1.0)]);

        assert_eq!(event_is_ongoing(&recent, &upcoming, cutoff), "1");
        assert_eq!(event_is_ongoing(&recent, &[], cutoff), "0");
        assert_eq!(event_is_ongoing(&stale, &upcoming, cutoff), "0");
        assert_eq!(event_is_ongoing(&[], &upcoming, cutoff), "0");
    }

    #[test]
    fn sequential_days_stop_at_first_gap() {
        let d = |n: f64| n * 86_400.0;
        let cutoffs = [d(0.0), d(1.0), d(2.0), d(3.0)];
        let s = stream(&[
            ((d(1.5) * 1_000.0) as i64, 1.0),
            ((d(2.5) * 1_000.0) as i64, 1.0),
        ]);

        assert_eq!(count_sequential_days(&s, &cutoffs), "2");
        assert_close(&recency_of_sequential_days(&s, &cutoffs), 1.0 / 2.0_f64.sqrt());

        let gap_first = stream(&[((d(1.5) * 1_000.0) as i64, 1.0)]);
        assert_eq!(count_sequential_days(&gap_first, &cutoffs), "0");
        assert_eq!(recency_of_sequential_days(&gap_first, &cutoffs), "0");
        assert_eq!(count_sequential_days(&s, &[]), "0");
    }

    #[test]
    fn windowed_aggregates_cover_thirty_hours() {
        let cutoff = 10.0 * 86_400.0;
        let hour = 3_600_000_i64;
        let base = 10 * DAY_MS;
        let s = stream(&[
            (base - 31 * hour, 100.0),
            (base - 30 * hour, 4.0),
            (base - 2 * hour, 8.0),
        ]);

        assert_eq!(max_30_hr(&s, cutoff, DataType::Interval), "8");
        assert_eq!(min_30_hr(&s, cutoff, DataType::Interval), "4");
        assert_eq!(mean_30_hr(&s, cutoff, DataType::Interval), "6");
        assert_eq!(max_30_hr(&s[..1], cutoff, DataType::Interval), "");
        assert_eq!(mean_30_hr(&s, cutoff, DataType::Ordinal), "");
    }

    #[test]
    fn daily_io_requires_exact_eight_hour_age() {
        let cutoff = 100_000.0;
        let exact = stream(&[(((cutoff - 28_800.0) * 1_000.0) as i64, 750.0)]);
        let near = stream(&[(((cutoff - 28_801.0) * 1_000.0) as i64, 750.0)]);

        assert_eq!(daily_io(&exact, cutoff), "750");
        assert_eq!(daily_io(&near, cutoff), "0");
        assert_eq!(daily_io(&[], cutoff), "");
    }

    #[test]
    fn los_io_sums_net_volume() {
        assert_eq!(los_io(&stream(&[(1, 500.0), (2, -200.0)])), "300");
        assert_eq!(los_io(&[]), "0");
    }

    #[test]
    fn inverse_days_is_capped_at_one() {
        let cutoff = 10.0 * 86_400.0;
        assert_eq!(inverse_days(&stream(&[(10 * DAY_MS - 1_000, 1.0)]), cutoff), "1");
        assert_eq!(inverse_days(&stream(&[(6 * DAY_MS, 1.0)]), cutoff), "0.25");
        assert_eq!(inverse_days(&[], cutoff), "0");
    }

    #[test]
    fn abs_slope_between_last_two_points() {
        let s = stream(&[(1_000, 10.0), (2_000, 12.0), (3_000, 9.0)]);
        let expected = 3.0 / (1_000.0 / 1_000.0 / 86_400.0);
        assert_close(&abs_slope(&s, DataType::Interval), expected);
        assert_eq!(abs_slope(&s[..1], DataType::Interval), "0");
        assert_eq!(abs_slope(&s, DataType::Nominal), "0");
    }
}
