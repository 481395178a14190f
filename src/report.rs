// src/report.rs

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, trace};

use crate::error::DiskUsageError;

/// One line of a `du`-style report: the space used by a project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEntry {
    /// Usage in MB, kept verbatim as it appears in the report.
    pub data_usage: String,
    pub project_path: PathBuf,
    /// 1-based line number in the source report.
    pub line: usize,
    project_id: String,
}

impl UsageEntry {
    /// Final segment of `project_path`; the key used against XNAT and the overview.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

/// Read and parse the report at `path`.
#[tracing::instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
pub fn parse_report<P: AsRef<Path>>(path: P) -> Result<Vec<UsageEntry>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read disk usage report: {:?}", path))?;
    parse_report_str(&text, path)
}

/// Parse report text. `origin` is only used in error messages.
///
/// The first line is a header and is dropped, blank lines are skipped, and
/// every other line must be `data_usage<TAB>project_path`.
pub fn parse_report_str(text: &str, origin: &Path) -> Result<Vec<UsageEntry>> {
    let mut lines = text.lines().enumerate();

    // 1) header
    match lines.next() {
        Some((_, header)) => trace!(header, "skipping report header"),
        None => {
            return Err(DiskUsageError::MalformedReport {
                path: origin.to_path_buf(),
                line: 1,
                reason: "missing header line".into(),
            }
            .into())
        }
    }

    // 2) data rows, in file order
    let mut entries = Vec::new();
    for (idx, raw) in lines {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split('\t');
        let (usage, project_path) = match (fields.next(), fields.next()) {
            (Some(u), Some(p)) => (u.trim(), p.trim()),
            _ => {
                return Err(DiskUsageError::MalformedReport {
                    path: origin.to_path_buf(),
                    line: line_no,
                    reason: format!("expected `data_usage<TAB>project_path`, got {:?}", line),
                }
                .into())
            }
        };

        let project_path = PathBuf::from(project_path);
        let project_id = project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DiskUsageError::MalformedReport {
                path: origin.to_path_buf(),
                line: line_no,
                reason: format!("no project directory in path {:?}", project_path),
            })?;

        entries.push(UsageEntry {
            data_usage: usage.to_string(),
            project_path,
            line: line_no,
            project_id,
        });
    }

    debug!(entries = entries.len(), "parsed disk usage report");
    Ok(entries)
}
