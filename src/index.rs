//! Case/day/cutoff index and labeled-case index.
//!
//! File formats:
//! - case/day index: `case_id,day_index,cutoff_seconds`, one row per day of stay
//! - labeled-case list: `participant<TAB>case_id`
//! - participant file `<participant>.txt`: `case_id,_,cutoff_seconds,_,day_index,...`
//!
//! `#` comment lines and blank lines are skipped everywhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{path}:{line}: invalid cutoff '{value}'")]
    InvalidCutoff {
        path: PathBuf,
        line: u64,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCutoff {
    pub day_index: String,
    pub cutoff_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDays {
    pub case_id: String,
    pub days: Vec<DayCutoff>,
}

impl CaseDays {
    /// Cutoffs of every day strictly before `position`, in stay order.
    pub fn prior_cutoffs(&self, position: usize) -> Vec<f64> {
        self.days[..position.min(self.days.len())]
            .iter()
            .map(|day| day.cutoff_seconds)
            .collect()
    }
}

/// Every day of every case under study, cases in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseDayIndex {
    cases: Vec<CaseDays>,
}

impl CaseDayIndex {
    pub fn from_rows<I, S, D>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, D, f64)>,
        S: Into<String>,
        D: Into<String>,
    {
        let mut cases: Vec<CaseDays> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (case_id, day_index, cutoff_seconds) in rows {
            let case_id = case_id.into();
            let slot = *positions.entry(case_id.clone()).or_insert_with(|| {
                cases.push(CaseDays {
                    case_id,
                    days: Vec::new(),
                });
                cases.len() - 1
            });
            cases[slot].days.push(DayCutoff {
                day_index: day_index.into(),
                cutoff_seconds,
            });
        }

        Self { cases }
    }

    pub fn cases(&self) -> &[CaseDays] {
        &self.cases
    }

    pub fn day_count(&self) -> usize {
        self.cases.iter().map(|case| case.days.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledCase {
    pub case_id: String,
    pub participant: String,
    /// Day of stay that was labeled; `None` when the participant file has no row for the case.
    pub labeled_day: Option<String>,
    pub cutoff_override: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<LabeledCase>", into = "Vec<LabeledCase>")]
pub struct LabeledCases {
    cases: Vec<LabeledCase>,
    positions: HashMap<String, usize>,
}

impl LabeledCases {
    /// Later duplicates of a case id are dropped.
    pub fn new(cases: Vec<LabeledCase>) -> Self {
        let mut unique: Vec<LabeledCase> = Vec::with_capacity(cases.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(cases.len());
        for case in cases {
            if positions.contains_key(&case.case_id) {
                continue;
            }
            positions.insert(case.case_id.clone(), unique.len());
            unique.push(case);
        }
        Self {
            cases: unique,
            positions,
        }
    }

    pub fn get(&self, case_id: &str) -> Option<&LabeledCase> {
        self.positions.get(case_id).map(|&idx| &self.cases[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledCase> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl From<Vec<LabeledCase>> for LabeledCases {
    fn from(cases: Vec<LabeledCase>) -> Self {
        Self::new(cases)
    }
}

impl From<LabeledCases> for Vec<LabeledCase> {
    fn from(labeled: LabeledCases) -> Self {
        labeled.cases
    }
}

fn reader(path: &Path, delimiter: u8) -> Result<csv::Reader<std::fs::File>, IndexError> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_path(path)
        .map_err(|source| IndexError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

fn records(path: &Path, delimiter: u8) -> Result<Vec<StringRecord>, IndexError> {
    reader(path, delimiter)?
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IndexError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_cutoff(path: &Path, record: &StringRecord, idx: usize) -> Result<f64, IndexError> {
    let raw = record.get(idx).unwrap_or_default();
    raw.parse::<f64>().map_err(|_| IndexError::InvalidCutoff {
        path: path.to_path_buf(),
        line: record.position().map(|p| p.line()).unwrap_or_default(),
        value: raw.to_string(),
    })
}

/// Loads the case/day/cutoff index. Rows without exactly three fields are ignored.
pub fn load_case_day_index(path: &Path) -> Result<CaseDayIndex, IndexError> {
    let mut rows = Vec::new();
    for record in records(path, b',')? {
        if record.len() != 3 {
            continue;
        }
        let cutoff = parse_cutoff(path, &record, 2)?;
        rows.push((record[0].to_string(), record[1].to_string(), cutoff));
    }
    let index = CaseDayIndex::from_rows(rows);

    info!(
        component = "index",
        event = "index.case_days.loaded",
        path = %path.display(),
        cases = index.cases().len(),
        days = index.day_count()
    );

    Ok(index)
}

/// Loads the labeled-case list and resolves each case's labeled day and
/// cutoff override from its participant file.
pub fn load_labeled_cases(
    list_path: &Path,
    participant_dir: &Path,
) -> Result<LabeledCases, IndexError> {
    let mut cases = Vec::new();
    for record in records(list_path, b'\t')? {
        if record.len() != 2 {
            continue;
        }
        cases.push(LabeledCase {
            case_id: record[1].to_string(),
            participant: record[0].to_string(),
            labeled_day: None,
            cutoff_override: None,
        });
    }
    let mut labeled = LabeledCases::new(cases);

    let mut participant_rows: HashMap<String, Vec<StringRecord>> = HashMap::new();
    for case in &mut labeled.cases {
        if !participant_rows.contains_key(&case.participant) {
            let path = participant_dir.join(format!("{}.txt", case.participant));
            participant_rows.insert(case.participant.clone(), records(&path, b',')?);
        }
        let path = participant_dir.join(format!("{}.txt", case.participant));
        let rows = &participant_rows[&case.participant];

        // last matching row wins
        if let Some(row) = rows
            .iter()
            .rev()
            .find(|row| row.len() >= 5 && &row[0] == case.case_id.as_str())
        {
            case.cutoff_override = Some(parse_cutoff(&path, row, 2)?);
            case.labeled_day = Some(row[4].to_string());
        } else {
            warn!(
                component = "index",
                event = "index.labeled_case.unresolved",
                case_id = %case.case_id,
                participant = %case.participant
            );
        }
    }

    info!(
        component = "index",
        event = "index.labeled_cases.loaded",
        path = %list_path.display(),
        cases = labeled.len()
    );

    Ok(labeled)
}
