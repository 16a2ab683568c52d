//! Explanation output records.

use cyclewatch_core::error::{CycleWatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Terminal output for one explained account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRecord {
    /// Account id.
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Cycle probability.
    pub risk: f64,
    /// Analyst narrative, or the fallback text.
    pub narrative: String,
}

/// Writes explanation records as JSON Lines.
///
/// The file is truncated when the writer opens; each record is flushed as
/// soon as it is written, so a failed run keeps what it produced.
#[derive(Debug)]
pub struct ExplanationWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl ExplanationWriter {
    /// Open `path` for a new run.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            written: 0,
        })
    }

    /// Append one record.
    pub fn write(&mut self, record: &ExplanationRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.written += 1;
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a JSON Lines explanation file.
pub fn read_explanations(path: impl AsRef<Path>) -> Result<Vec<ExplanationRecord>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<ExplanationRecord>(l).map_err(CycleWatchError::from))
        .collect()
}
