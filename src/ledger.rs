//! Row-alignment ledger: one case identifier per committed case-day, in the
//! same order as every feature file row.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

pub const LEDGER_FILE: &str = "case_order_rows.txt";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("ledger row for case {0:?} contains a line break")]
    InvalidCaseId(String),
}

#[derive(Debug)]
pub struct RowAlignmentLedger {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: usize,
}

impl RowAlignmentLedger {
    /// Opens the ledger in `dir`. With `reset` the ledger is truncated,
    /// otherwise rows are appended after the existing ones.
    pub fn open(dir: &Path, reset: bool) -> Result<Self, LedgerError> {
        let path = dir.join(LEDGER_FILE);
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;
        let rows = if reset { 0 } else { count_lines(&path).map_err(io_err)? };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!reset)
            .truncate(reset)
            .open(&path)
            .map_err(io_err)?;

        info!(
            component = "ledger",
            event = "ledger.open",
            path = %path.display(),
            reset,
            existing_rows = rows
        );

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows,
        })
    }

    pub fn append(&mut self, case_id: &str) -> Result<(), LedgerError> {
        if case_id.contains(|c: char| c == '\n' || c == '\r') {
            return Err(LedgerError::InvalidCaseId(case_id.to_string()));
        }
        writeln!(self.writer, "{case_id}").map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.rows += 1;
        debug!(
            component = "ledger",
            event = "ledger.append",
            case_id,
            row = self.rows
        );
        Ok(())
    }

    /// Rows in the ledger, including those present before opening.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<(), LedgerError> {
        self.writer.flush().map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Number of newline-terminated rows in a file; a missing file has none.
pub fn count_lines(path: &Path) -> io::Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut reader = BufReader::new(file);
    let mut lines = 0;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|&&b| b == b'\n').count();
        let consumed = buf.len();
        reader.consume(consumed);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_truncates_and_append_continues() {
        let dir = tempfile::tempdir().unwrap();

        let mut ledger = RowAlignmentLedger::open(dir.path(), true).unwrap();
        ledger.append("A").unwrap();
        ledger.append("B").unwrap();
        ledger.flush().unwrap();
        drop(ledger);

        let mut ledger = RowAlignmentLedger::open(dir.path(), false).unwrap();
        assert_eq!(ledger.rows(), 2);
        ledger.append("C").unwrap();
        ledger.flush().unwrap();
        assert_eq!(ledger.rows(), 3);
        drop(ledger);
        assert_eq!(
            fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap(),
            "A\nB\nC\n"
        );

        let ledger = RowAlignmentLedger::open(dir.path(), true).unwrap();
        assert_eq!(ledger.rows(), 0);
        drop(ledger);
        assert_eq!(fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap(), "");
    }

    #[test]
    fn case_ids_with_line_breaks_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = RowAlignmentLedger::open(dir.path(), true).unwrap();
        assert!(matches!(
            ledger.append("A\nB"),
            Err(LedgerError::InvalidCaseId(_))
        ));
        assert_eq!(ledger.rows(), 0);
    }

    #[test]
    fn count_lines_counts_empty_rows_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.txt");
        assert_eq!(count_lines(&path).unwrap(), 0);
        fs::write(&path, "\n1,2\n\n").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);
    }
}
