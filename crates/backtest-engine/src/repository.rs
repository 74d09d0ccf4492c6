//! Run repository.
//!
//! The engine treats persistence as an external collaborator: the trait is
//! the contract, `FsRunRepository` is the reference implementation. A run
//! directory holds `record.json`, `report.json`, and the equity curve and
//! trade ledger as tabular CSV artifacts referenced from the report. Writes
//! are staged in a temp directory and published with a single rename, so an
//! on-disk artifact is complete or absent; a mutex serializes writers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use strategy_core::EngineError;

use crate::models::{BacktestReport, EquityPoint, Trade, TradeKind};

/// Descriptive metadata for one stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub run_name: String,
    pub instrument: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub strategy_id: String,
    pub strategy_version: String,
    pub strategy_params: BTreeMap<String, f64>,
    pub capital: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A run loaded back from the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRun {
    pub record: RunRecord,
    pub report: BacktestReport,
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub strategy_id: Option<String>,
    pub instrument: Option<String>,
}

/// Summary row returned by `list_runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub run_id: String,
    pub run_name: String,
    pub instrument: String,
    pub strategy_id: String,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
}

/// Persistence contract. `save_run` is idempotent per explicit run id; the
/// engine never reads back its own writes within an evaluation.
pub trait RunRepository: Send + Sync {
    fn save_run(&self, record: &RunRecord, report: &BacktestReport)
        -> Result<String, EngineError>;
    fn load_run(&self, run_id: &str) -> Result<StoredRun, EngineError>;
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunDescriptor>, EngineError>;
    fn delete_run(&self, run_id: &str) -> Result<(), EngineError>;
}

/// Report as persisted: curves stripped out, artifact file names recorded.
#[derive(Debug, Serialize, Deserialize)]
struct StoredReport {
    #[serde(flatten)]
    report: BacktestReport,
    equity_curve_artifact: String,
    trades_artifact: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EquityRow {
    date: NaiveDate,
    equity: f64,
    cash: f64,
    position_shares: i64,
    position_value: f64,
    price: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TradeRow {
    date: NaiveDate,
    kind: String,
    price: f64,
    shares: i64,
    gross_value: f64,
    fee: f64,
    tax: f64,
    slippage_cost: f64,
    signal: i8,
    reason_tags: String,
}

const RECORD_FILE: &str = "record.json";
const REPORT_FILE: &str = "report.json";
const EQUITY_FILE: &str = "equity_curve.csv";
const TRADES_FILE: &str = "trades.csv";

pub struct FsRunRepository {
    root: PathBuf,
    writer: Mutex<()>,
}

impl FsRunRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            writer: Mutex::new(()),
        })
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, EngineError> {
        if run_id.is_empty()
            || run_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(EngineError::Repository(format!(
                "invalid run id {run_id:?}"
            )));
        }
        Ok(self.root.join(run_id))
    }

    fn write_artifacts(
        dir: &Path,
        record: &RunRecord,
        report: &BacktestReport,
    ) -> Result<(), EngineError> {
        fs::create_dir_all(dir)?;

        fs::write(
            dir.join(RECORD_FILE),
            serde_json::to_vec_pretty(record)?,
        )?;

        let mut stripped = report.clone();
        stripped.equity_curve = Vec::new();
        stripped.trades = Vec::new();
        let stored = StoredReport {
            report: stripped,
            equity_curve_artifact: EQUITY_FILE.to_string(),
            trades_artifact: TRADES_FILE.to_string(),
        };
        fs::write(dir.join(REPORT_FILE), serde_json::to_vec_pretty(&stored)?)?;

        let mut equity_writer = csv::Writer::from_path(dir.join(EQUITY_FILE))
            .map_err(|e| EngineError::Repository(e.to_string()))?;
        for point in &report.equity_curve {
            equity_writer
                .serialize(EquityRow {
                    date: point.date,
                    equity: point.equity,
                    cash: point.cash,
                    position_shares: point.position_shares,
                    position_value: point.position_value,
                    price: point.price,
                })
                .map_err(|e| EngineError::Repository(e.to_string()))?;
        }
        equity_writer
            .flush()
            .map_err(|e| EngineError::Repository(e.to_string()))?;

        let mut trade_writer = csv::Writer::from_path(dir.join(TRADES_FILE))
            .map_err(|e| EngineError::Repository(e.to_string()))?;
        for trade in &report.trades {
            trade_writer.serialize(TradeRow {
                date: trade.date,
                kind: match trade.kind {
                    TradeKind::Buy => "buy".to_string(),
                    TradeKind::Sell => "sell".to_string(),
                },
                price: trade.price,
                shares: trade.shares,
                gross_value: trade.gross_value,
                fee: trade.fee,
                tax: trade.tax,
                slippage_cost: trade.slippage_cost,
                signal: trade.signal,
                reason_tags: trade
                    .reason_tags
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("|"),
            })
            .map_err(|e| EngineError::Repository(e.to_string()))?;
        }
        trade_writer
            .flush()
            .map_err(|e| EngineError::Repository(e.to_string()))?;

        Ok(())
    }
}

impl RunRepository for FsRunRepository {
    fn save_run(
        &self,
        record: &RunRecord,
        report: &BacktestReport,
    ) -> Result<String, EngineError> {
        let final_dir = self.run_dir(&record.run_id)?;
        let staging = self.root.join(format!(".staging-{}", record.run_id));

        let _guard = self
            .writer
            .lock()
            .map_err(|_| EngineError::Repository("writer lock poisoned".to_string()))?;

        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        let written = Self::write_artifacts(&staging, record, report);
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        // Same id overwrites atomically: drop the old directory, then
        // publish the staged one with a single rename.
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&staging, &final_dir)?;

        info!(run_id = %record.run_id, "run saved");
        Ok(record.run_id.clone())
    }

    fn load_run(&self, run_id: &str) -> Result<StoredRun, EngineError> {
        let dir = self.run_dir(run_id)?;
        if !dir.exists() {
            return Err(EngineError::Repository(format!("run {run_id} not found")));
        }

        let record: RunRecord = serde_json::from_slice(&fs::read(dir.join(RECORD_FILE))?)?;
        let stored: StoredReport = serde_json::from_slice(&fs::read(dir.join(REPORT_FILE))?)?;
        let mut report = stored.report;

        let mut equity_reader = csv::Reader::from_path(dir.join(stored.equity_curve_artifact))
            .map_err(|e| EngineError::Repository(e.to_string()))?;
        for row in equity_reader.deserialize::<EquityRow>() {
            let row = row.map_err(|e| EngineError::Repository(e.to_string()))?;
            report.equity_curve.push(EquityPoint {
                date: row.date,
                equity: row.equity,
                cash: row.cash,
                position_shares: row.position_shares,
                position_value: row.position_value,
                price: row.price,
            });
        }

        let mut trade_reader = csv::Reader::from_path(dir.join(stored.trades_artifact))
            .map_err(|e| EngineError::Repository(e.to_string()))?;
        for row in trade_reader.deserialize::<TradeRow>() {
            let row = row.map_err(|e| EngineError::Repository(e.to_string()))?;
            report.trades.push(Trade {
                date: row.date,
                kind: match row.kind.as_str() {
                    "buy" => TradeKind::Buy,
                    "sell" => TradeKind::Sell,
                    other => {
                        return Err(EngineError::Repository(format!(
                            "unknown trade kind {other:?}"
                        )))
                    }
                },
                price: row.price,
                shares: row.shares,
                gross_value: row.gross_value,
                fee: row.fee,
                tax: row.tax,
                slippage_cost: row.slippage_cost,
                signal: row.signal,
                reason_tags: if row.reason_tags.is_empty() {
                    Default::default()
                } else {
                    row.reason_tags.split('|').map(String::from).collect()
                },
            });
        }

        Ok(StoredRun { record, report })
    }

    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunDescriptor>, EngineError> {
        let mut descriptors = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }

            let record_path = path.join(RECORD_FILE);
            if !record_path.exists() {
                continue;
            }
            let record: RunRecord = serde_json::from_slice(&fs::read(record_path)?)?;

            if let Some(strategy_id) = &filter.strategy_id {
                if &record.strategy_id != strategy_id {
                    continue;
                }
            }
            if let Some(instrument) = &filter.instrument {
                if &record.instrument != instrument {
                    continue;
                }
            }

            let stored: StoredReport =
                serde_json::from_slice(&fs::read(path.join(REPORT_FILE))?)?;
            descriptors.push(RunDescriptor {
                run_id: record.run_id,
                run_name: record.run_name,
                instrument: record.instrument,
                strategy_id: record.strategy_id,
                total_return: stored.report.metrics.total_return,
                sharpe_ratio: stored.report.metrics.sharpe_ratio,
                total_trades: stored.report.metrics.total_trades,
            });
        }

        descriptors.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(descriptors)
    }

    fn delete_run(&self, run_id: &str) -> Result<(), EngineError> {
        let dir = self.run_dir(run_id)?;
        let _guard = self
            .writer
            .lock()
            .map_err(|_| EngineError::Repository("writer lock poisoned".to_string()))?;
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
