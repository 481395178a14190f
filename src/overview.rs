// src/overview.rs

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use std::{collections::HashMap, fs::File, io::Read, path::Path};
use tracing::{info, warn};

use crate::error::DiskUsageError;

const SUBSTUDY_COLUMN: &str = "substudy";
const MAIN_STUDY_COLUMN: &str = "main_study";

/// Which projects take part in a run, and which main study each rolls up into.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Overview {
    /// No overview given: every project is processed and is its own main study.
    #[default]
    Unfiltered,
    Filtered {
        /// Expected substudy ids, de-duplicated, in file order.
        substudies: Vec<String>,
        /// substudy → main study. The first row for a substudy wins.
        main_studies: HashMap<String, String>,
    },
}

impl Overview {
    pub fn is_filtering(&self) -> bool {
        matches!(self, Overview::Filtered { .. })
    }

    /// Whether `project_id` should be processed at all.
    pub fn accepts(&self, project_id: &str) -> bool {
        match self {
            Overview::Unfiltered => true,
            Overview::Filtered { main_studies, .. } => main_studies.contains_key(project_id),
        }
    }

    /// Main study for `project_id`, falling back to the id itself.
    pub fn main_study_for<'a>(&'a self, project_id: &'a str) -> &'a str {
        match self {
            Overview::Unfiltered => project_id,
            Overview::Filtered { main_studies, .. } => main_studies
                .get(project_id)
                .map(String::as_str)
                .unwrap_or(project_id),
        }
    }

    /// Expected substudies; empty when unfiltered.
    pub fn substudies(&self) -> &[String] {
        match self {
            Overview::Unfiltered => &[],
            Overview::Filtered { substudies, .. } => substudies,
        }
    }
}

/// Load the study overview at `path`, or [`Overview::Unfiltered`] when there is none.
pub fn load_overview(path: Option<&Path>) -> Result<Overview> {
    let Some(path) = path else {
        info!("No study overview provided - processing all projects");
        return Ok(Overview::Unfiltered);
    };

    let file = File::open(path)
        .with_context(|| format!("Failed to open study overview: {:?}", path))?;
    let overview = read_overview(file, path)?;

    let expected = overview.substudies().len();
    if expected == 0 {
        warn!(path = %path.display(), "study overview lists no substudies - no projects will be reported");
    } else {
        info!("Number of substudies: {}", expected);
    }
    Ok(overview)
}

/// Parse a `;`-separated overview from any reader. `origin` is used in errors.
pub fn read_overview<R: Read>(reader: R, origin: &Path) -> Result<Overview> {
    let format_error = |reason: String| DiskUsageError::OverviewFormat {
        path: origin.to_path_buf(),
        reason,
    };

    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    // 1) locate the two required columns by name
    let headers = rdr
        .headers()
        .with_context(|| format!("CSV parse error in header of {:?}", origin))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
            .ok_or_else(|| format_error(format!("missing required column `{}`", name)))
    };
    let sub_idx = column(SUBSTUDY_COLUMN)?;
    let main_idx = column(MAIN_STUDY_COLUMN)?;

    // 2) collect rows, keeping first occurrence of each substudy
    let mut substudies = Vec::new();
    let mut main_studies = HashMap::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result
            .with_context(|| format!("CSV parse error in {:?} at record {}", origin, idx))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let (Some(sub), Some(main)) = (record.get(sub_idx), record.get(main_idx)) else {
            return Err(format_error(format!(
                "record {} has {} fields, expected at least {}",
                idx + 1,
                record.len(),
                sub_idx.max(main_idx) + 1
            ))
            .into());
        };
        if !main_studies.contains_key(sub) {
            substudies.push(sub.to_string());
            main_studies.insert(sub.to_string(), main.to_string());
        }
    }

    Ok(Overview::Filtered {
        substudies,
        main_studies,
    })
}
