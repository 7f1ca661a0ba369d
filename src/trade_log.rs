// =============================================================================
// Trade Log: append-only CSV record of every lifecycle transition
// =============================================================================
//
// Schema (header written once, when the file is created):
//
//   time,direction,stake,result,contract_id,profit
//
// `result` is PENDING / WIN / LOSS / FAILED.  Before the venue assigns a
// contract id the column carries the request's correlation id.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::types::Direction;

pub const HEADER: [&str; 6] = ["time", "direction", "stake", "result", "contract_id", "profit"];

/// One row of the trade log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub time: String,
    pub direction: Direction,
    pub stake: f64,
    pub result: String,
    pub contract_id: Option<String>,
    pub profit: Option<f64>,
}

/// Destination for completed lifecycle records.
pub trait TradeSink: Send + Sync {
    fn record(&self, record: &TradeRecord) -> EngineResult<()>;
}

// ---------------------------------------------------------------------------
// CSV file sink
// ---------------------------------------------------------------------------

pub struct CsvTradeLog {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvTradeLog {
    /// Open `path` for appending, writing the header if the file is new or
    /// empty.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::TradeLog(format!("{}: {e}", parent.display())))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EngineError::TradeLog(format!("{}: {e}", path.display())))?;
        let fresh = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| EngineError::TradeLog(e.to_string()))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record(HEADER)?;
            writer
                .flush()
                .map_err(|e| EngineError::TradeLog(e.to_string()))?;
            info!(path = %path.display(), "trade log created");
        }

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeSink for CsvTradeLog {
    fn record(&self, record: &TradeRecord) -> EngineResult<()> {
        let mut writer = self.writer.lock();
        writer.serialize(record)?;
        writer
            .flush()
            .map_err(|e| EngineError::TradeLog(e.to_string()))
    }
}

impl std::fmt::Debug for CsvTradeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvTradeLog").field("path", &self.path).finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory sink for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Default)]
pub struct MemoryTradeLog {
    records: Mutex<Vec<TradeRecord>>,
}

#[cfg(test)]
impl MemoryTradeLog {
    pub fn records(&self) -> Vec<TradeRecord> {
        self.records.lock().clone()
    }

    pub fn results(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.result.clone()).collect()
    }
}

#[cfg(test)]
impl TradeSink for MemoryTradeLog {
    fn record(&self, record: &TradeRecord) -> EngineResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pending() -> TradeRecord {
        TradeRecord {
            time: "2024-03-01T12:00:00+00:00".into(),
            direction: Direction::Call,
            stake: 10.0,
            result: "PENDING".into(),
            contract_id: Some("17".into()),
            profit: None,
        }
    }

    #[test]
    fn header_written_once_then_rows_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trade_log.csv");

        let log = CsvTradeLog::open(&path).unwrap();
        log.record(&pending()).unwrap();
        drop(log);

        let log = CsvTradeLog::open(&path).unwrap();
        log.record(&TradeRecord {
            result: "WIN".into(),
            contract_id: Some("5551".into()),
            profit: Some(5.0),
            ..pending()
        })
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "time,direction,stake,result,contract_id,profit");
        assert_eq!(lines[1], "2024-03-01T12:00:00+00:00,CALL,10.0,PENDING,17,");
        assert_eq!(lines[2], "2024-03-01T12:00:00+00:00,CALL,10.0,WIN,5551,5.0");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/nested/trades.csv");
        let log = CsvTradeLog::open(&path).unwrap();
        assert_eq!(log.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn memory_sink_collects_results() {
        let sink = MemoryTradeLog::default();
        sink.record(&pending()).unwrap();
        assert_eq!(sink.results(), vec!["PENDING"]);
    }
}
