// src/write.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::Builder;
use tracing::info;

use crate::{report::UsageEntry, xnat::ProjectRecord};

/// Where reports go when no output folder is given, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

const FILE_SUFFIX: &str = "XNAT_Disk_usage.csv";

/// One line of the billing/ownership CSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub project_id: String,
    pub main_study: String,
    pub project_path: String,
    #[serde(rename = "data_usage (MB)")]
    pub data_usage: String,
    pub xnat_project_name: String,
    pub xnat_project_id: String,
    pub pi_firstname: String,
    pub pi_lastname: String,
    pub pi_title: String,
    pub pi_email: String,
    pub pi_institution: String,
}

impl OutputRow {
    /// Header row, in column order.
    pub const COLUMNS: [&'static str; 11] = [
        "project_id",
        "main_study",
        "project_path",
        "data_usage (MB)",
        "xnat_project_name",
        "xnat_project_id",
        "pi_firstname",
        "pi_lastname",
        "pi_title",
        "pi_email",
        "pi_institution",
    ];

    pub fn new(entry: &UsageEntry, main_study: &str, project: ProjectRecord) -> Self {
        let ProjectRecord { id, name, pi } = project;
        Self {
            project_id: entry.project_id().to_string(),
            main_study: main_study.to_string(),
            project_path: entry.project_path.display().to_string(),
            data_usage: entry.data_usage.clone(),
            xnat_project_name: name,
            xnat_project_id: id,
            pi_firstname: pi.firstname,
            pi_lastname: pi.lastname,
            pi_title: pi.title,
            pi_email: pi.email,
            pi_institution: pi.institution,
        }
    }
}

/// Names one output file: the run date plus the report it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportKey {
    pub date: NaiveDate,
    pub basename: String,
}

impl ReportKey {
    /// Key for `report_path`, using its file stem (`du_2024.txt` → `du_2024`).
    pub fn for_report(date: NaiveDate, report_path: &Path) -> Self {
        let basename = report_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        Self { date, basename }
    }

    /// `<YYYY-MM-DD>_<basename>_XNAT_Disk_usage.csv`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.date.format("%Y-%m-%d"),
            self.basename,
            FILE_SUFFIX
        )
    }
}

/// Write `rows` as CSV under `output_dir` (or [`DEFAULT_OUTPUT_DIR`]).
///
/// The header is always written. The file is written to a temp file next to
/// its final name and persisted over it, so a same-day re-run replaces the
/// previous file. On any error the temp file is removed.
#[tracing::instrument(level = "debug", skip(rows), fields(rows = rows.len()))]
pub fn write_report(rows: &[OutputRow], key: &ReportKey, output_dir: Option<&Path>) -> Result<PathBuf> {
    // 1) make sure the target directory exists
    let dir = output_dir.unwrap_or_else(|| Path::new(DEFAULT_OUTPUT_DIR));
    fs::create_dir_all(dir).with_context(|| format!("creating output directory {:?}", dir))?;

    let path = dir.join(key.file_name());
    let mut tmp = Builder::new()
        .prefix(&format!(".{}.", key.file_name()))
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {:?}", dir))?;

    // 2) header + rows into the temp file
    {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        wtr.write_record(OutputRow::COLUMNS)
            .with_context(|| format!("writing header for {:?}", path))?;
        for row in rows {
            wtr.serialize(row)
                .with_context(|| format!("writing row for {} to {:?}", row.project_id, path))?;
        }
        wtr.flush().with_context(|| format!("flushing {:?}", path))?;
    }

    // 3) swap into place
    tmp.persist(&path)
        .with_context(|| format!("moving temp file over {:?}", path))?;

    info!("Output written to {}.", path.display());
    Ok(path)
}
