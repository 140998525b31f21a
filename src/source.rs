use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::Snapshot;

/// Reads poll cycles from a JSON-lines stream: each non-blank line is one
/// JSON array of snapshots. Malformed lines are logged and skipped.
pub struct SnapshotSource<R> {
    lines: Lines<BufReader<R>>,
    label: String,
    line_no: usize,
    parse_failures: u64,
}

impl SnapshotSource<File> {
    pub async fn open(path: &str) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(file, path))
    }
}

impl<R: AsyncRead + Unpin> SnapshotSource<R> {
    pub fn new(reader: R, label: &str) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            label: label.to_string(),
            line_no: 0,
            parse_failures: 0,
        }
    }

    /// Next cycle's batch, or `None` at end of input.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Snapshot>>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Vec<Snapshot>>(line) {
                Ok(batch) => {
                    debug!("[REPLAY] {}:{} → {} snapshots", self.label, self.line_no, batch.len());
                    return Ok(Some(batch));
                }
                Err(e) => {
                    self.parse_failures += 1;
                    warn!(
                        parse_failures = self.parse_failures,
                        "[REPLAY] skipping malformed cycle at {}:{}: {e}",
                        self.label, self.line_no,
                    );
                }
            }
        }
        Ok(None)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }
}
