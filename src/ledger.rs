//! Append-only change ledger for downstream consumers of the catalog.

use crate::record::{epoch_ms, CardRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Kind of change a ledger line records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First time the card was seen.
    New,
    /// Content differed from the stored record.
    Changed,
    /// Removed by the integrity purge.
    Purged,
}

/// One JSONL line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Epoch milliseconds when the line was written.
    pub emitted_at_epoch_ms: u64,
    /// Card id.
    pub card_no: String,
    /// CRC32 of the record content, timestamp excluded.
    pub checksum: u32,
    /// What happened.
    pub change: ChangeKind,
}

impl LedgerEntry {
    /// Derives an entry from a record, stamped with the current time.
    pub fn from_record(record: &CardRecord, change: ChangeKind) -> Self {
        Self {
            emitted_at_epoch_ms: epoch_ms(),
            card_no: record.id.clone(),
            checksum: record.content_checksum(),
            change,
        }
    }
}

/// JSONL file that only ever grows.
#[derive(Debug, Clone)]
pub struct ChangeLedger {
    path: PathBuf,
}

impl ChangeLedger {
    /// Ledger at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file (and parent directories) if needed without writing anything.
    pub fn ensure_writable(&self) -> Result<()> {
        self.open().map(drop)
    }

    /// Appends `entries`; a no-op for an empty batch. Returns the number of lines written.
    pub fn append(&self, entries: &[LedgerEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut file = self.open()?;
        for entry in entries {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        tracing::info!(path = %self.path.display(), entries = entries.len(), "appended change ledger");
        Ok(entries.len())
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("failed to create {:?}", parent))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open ledger {:?}", self.path))
    }

    /// Reads every entry back, skipping blank lines.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open ledger {:?}", self.path))?;
        let mut entries = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read ledger line {}", idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line)
                .with_context(|| format!("invalid ledger entry at line {}", idx + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
