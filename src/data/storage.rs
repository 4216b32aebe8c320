// Append-only trade history in JSON Lines format. One record per line, so new
// records never rewrite the file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::TradeRecord;

/// Sink for resolved trades. `record` must never block the caller.
pub trait TradeHistory: Send + Sync {
    fn record(&self, record: TradeRecord);
}

/// File-backed trade history
#[derive(Clone)]
pub struct TradeStorage {
    file_path: PathBuf,
    /// Serializes appends from concurrently spawned writers
    write_lock: Arc<Mutex<()>>,
}

impl TradeStorage {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn ensure_directory(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create storage directory")?;
            }
        }
        Ok(())
    }

    /// Append one record and wait for the write
    pub async fn save_record(&self, record: &TradeRecord) -> Result<()> {
        self.ensure_directory().await?;

        let mut line = serde_json::to_string(record).context("Failed to serialize trade record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .context("Failed to open trade history file")?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            token = %record.token_id,
            side = %record.side,
            success = record.success,
            file = %self.file_path.display(),
            "Saved trade record"
        );

        Ok(())
    }

    /// Read every record; unparsable lines are logged and skipped
    pub async fn load_all_records(&self) -> Result<Vec<TradeRecord>> {
        if !self.file_path.exists() {
            info!(
                "Trade history file does not exist yet: {}",
                self.file_path.display()
            );
            return Ok(Vec::new());
        }

        let file = File::open(&self.file_path)
            .await
            .context("Failed to open trade history file")?;

        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        let mut line_number = 0;
        let mut error_count = 0;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "Failed to parse line {} in {}: {}",
                        line_number,
                        self.file_path.display(),
                        e
                    );
                    error_count += 1;
                }
            }
        }

        info!(
            "Loaded {} trade records from {} ({} parse errors)",
            records.len(),
            self.file_path.display(),
            error_count
        );

        Ok(records)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

impl TradeHistory for TradeStorage {
    fn record(&self, record: TradeRecord) {
        let storage = self.clone();
        tokio::spawn(async move {
            if let Err(e) = storage.save_record(&record).await {
                warn!(token = %record.token_id, error = %e, "Failed to persist trade record");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{IntentKind, SubmissionResult};
    use crate::error::ExecutionError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(token: &str, success: bool) -> TradeRecord {
        let result = if success {
            SubmissionResult {
                success: true,
                signature: Some(format!("sig-{}", token)),
                error: None,
                tier: None,
                details: Vec::new(),
                elapsed: Duration::from_millis(120),
            }
        } else {
            SubmissionResult::failed(
                ExecutionError::TransactionFailed {
                    signature: format!("sig-{}", token),
                    reason: "slippage tolerance exceeded".to_string(),
                },
                Vec::new(),
                Duration::from_millis(120),
            )
        };
        TradeRecord::from_submission(token, IntentKind::Exit, "stop_loss", 10.0, Some(0.5), &result)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TradeStorage::new(temp_dir.path().join("nested/trades.jsonl"));

        storage.save_record(&record("A", true)).await.unwrap();
        storage.save_record(&record("B", false)).await.unwrap();

        let loaded = storage.load_all_records().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].success);
        assert!(!loaded[1].success);
        assert_eq!(loaded[1].error_kind.as_deref(), Some("transaction_failed"));
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TradeStorage::new(temp_dir.path().join("empty.jsonl"));
        assert!(storage.load_all_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trades.jsonl");
        let storage = TradeStorage::new(&path);
        storage.save_record(&record("A", true)).await.unwrap();
        tokio::fs::write(
            &path,
            format!("{}\nnot json\n\n", tokio::fs::read_to_string(&path).await.unwrap().trim()),
        )
        .await
        .unwrap();

        assert_eq!(storage.load_all_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_is_fire_and_forget() {
        let temp_dir = TempDir::new().unwrap();
        let storage = TradeStorage::new(temp_dir.path().join("trades.jsonl"));

        for token in ["A", "B", "C"] {
            TradeHistory::record(&storage, record(token, true));
        }

        let mut loaded = Vec::new();
        for _ in 0..50 {
            loaded = storage.load_all_records().await.unwrap();
            if loaded.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(loaded.len(), 3);
    }
}
