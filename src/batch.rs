// src/batch.rs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{
    join::join_records,
    overview::{load_overview, Overview},
    report::parse_report,
    write::{write_report, ReportKey},
    xnat::{resolve_project, Credentials, Registry, RegistrySession},
};

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub xnat_url: String,
    pub credentials: Credentials,
    pub report_paths: Vec<PathBuf>,
    pub overview_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Date stamped into output file names.
    pub date: NaiveDate,
}

/// Outcome of one input report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportResult {
    pub report_path: PathBuf,
    pub output_path: PathBuf,
    /// Data lines parsed from the report.
    pub parsed: usize,
    /// Rows written to `output_path`.
    pub rows: usize,
    /// Expected substudies that produced no row.
    pub missing_substudies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub reports: Vec<ReportResult>,
}

impl BatchSummary {
    /// Written files, in report order.
    pub fn output_paths(&self) -> Vec<&Path> {
        self.reports.iter().map(|r| r.output_path.as_path()).collect()
    }
}

/// Keeps a session open for the length of a run and closes it however the run ends.
struct SessionGuard<S: RegistrySession> {
    session: S,
    closed: bool,
}

impl<S: RegistrySession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    fn session(&mut self) -> &mut S {
        &mut self.session
    }

    fn close(mut self) -> Result<()> {
        self.closed = true;
        self.session.close().context("closing XNAT session")
    }
}

impl<S: RegistrySession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.session.close() {
            warn!("failed to close XNAT session after an aborted run: {:#}", err);
        }
    }
}

/// Run every report in `request` against one registry session.
///
/// The overview is loaded before connecting. Reports are processed in order;
/// the first failing report ends the run, and files written for earlier
/// reports stay on disk.
pub fn run_batch<R: Registry>(registry: &R, request: &BatchRequest) -> Result<BatchSummary> {
    let overview = load_overview(request.overview_path.as_deref())?;

    let session = registry
        .connect(&request.xnat_url, &request.credentials)
        .with_context(|| format!("connecting to {}", request.xnat_url))?;
    let mut guard = SessionGuard::new(session);

    let total = request.report_paths.len();
    let mut summary = BatchSummary::default();
    for (i, report_path) in request.report_paths.iter().enumerate() {
        info!("Processing report {}/{}: {}", i + 1, total, report_path.display());
        let result = process_report(
            guard.session(),
            &overview,
            report_path,
            request.output_dir.as_deref(),
            request.date,
        )
        .with_context(|| format!("processing report {:?}", report_path))?;
        summary.reports.push(result);
    }

    guard.close()?;
    info!(
        "Processed {} reports, generated {} output files",
        total,
        summary.reports.len()
    );
    Ok(summary)
}

/// Parse → join → write for a single report.
pub fn process_report<S: RegistrySession>(
    session: &mut S,
    overview: &Overview,
    report_path: &Path,
    output_dir: Option<&Path>,
    date: NaiveDate,
) -> Result<ReportResult> {
    let entries = parse_report(report_path)?;
    info!("Number of projects in du output: {}", entries.len());

    let joined = join_records(&entries, overview, |id| resolve_project(session, id))?;

    let key = ReportKey::for_report(date, report_path);
    let output_path = write_report(&joined.rows, &key, output_dir)?;
    info!("Number of entries in output: {}", joined.rows.len());

    if joined.unresolved > 0 {
        info!(
            unresolved = joined.unresolved,
            "projects in the report were not found in XNAT"
        );
    }
    if joined.filtered_out > 0 {
        info!(
            filtered_out = joined.filtered_out,
            "projects in the report are not listed in the study overview"
        );
    }
    if !joined.missing.is_empty() {
        warn!("Missing substudies: {:?}", joined.missing);
    }

    Ok(ReportResult {
        report_path: report_path.to_path_buf(),
        output_path,
        parsed: entries.len(),
        rows: joined.rows.len(),
        missing_substudies: joined.missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DiskUsageError,
        xnat::{FakeRegistry, ProjectRecord},
    };
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn request(dir: &TempDir, reports: &[&str]) -> BatchRequest {
        BatchRequest {
            xnat_url: "https://xnat.test".into(),
            credentials: Credentials::new("user", "secret"),
            report_paths: reports.iter().map(|r| dir.path().join(r)).collect(),
            overview_path: None,
            output_dir: Some(dir.path().join("out")),
            date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    fn registry() -> FakeRegistry {
        FakeRegistry::new().with_project(ProjectRecord {
            id: "projA".into(),
            name: "Study A".into(),
            ..Default::default()
        })
    }

    #[test]
    fn one_session_for_all_reports() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.txt"), "h\n1\t/d/projA\n")?;
        fs::write(dir.path().join("b.txt"), "h\n2\t/d/projA\n3\t/d/projZ\n")?;

        let registry = registry();
        let counters = registry.counters();
        let summary = run_batch(&registry, &request(&dir, &["a.txt", "b.txt"]))?;

        assert_eq!(counters.connects(), 1);
        assert_eq!(counters.closes(), 1);
        assert_eq!(counters.lookups(), 3);
        let names: Vec<_> = summary
            .output_paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "2024-01-31_a_XNAT_Disk_usage.csv",
                "2024-01-31_b_XNAT_Disk_usage.csv"
            ]
        );
        assert_eq!(summary.reports[1].parsed, 2);
        assert_eq!(summary.reports[1].rows, 1);
        Ok(())
    }

    #[test]
    fn failing_report_still_closes_session_and_keeps_earlier_files() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("good.txt"), "h\n1\t/d/projA\n")?;
        fs::write(dir.path().join("bad.txt"), "h\nno tab here\n")?;

        let registry = registry();
        let counters = registry.counters();
        let err = run_batch(&registry, &request(&dir, &["good.txt", "bad.txt"])).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DiskUsageError>(),
            Some(DiskUsageError::MalformedReport { .. })
        ));
        assert_eq!(counters.closes(), 1);
        let out = dir.path().join("out");
        assert!(out.join("2024-01-31_good_XNAT_Disk_usage.csv").exists());
        assert!(!out.join("2024-01-31_bad_XNAT_Disk_usage.csv").exists());
        Ok(())
    }

    #[test]
    fn lookup_failure_aborts_the_run() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("du.txt"), "h\n1\t/d/projA\n2\t/d/boom\n")?;

        let registry = registry().failing_on("boom");
        let counters = registry.counters();
        let err = run_batch(&registry, &request(&dir, &["du.txt"])).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<DiskUsageError>(),
            Some(DiskUsageError::Lookup { .. })
        ));
        assert_eq!(counters.closes(), 1);
        assert!(!dir.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn bad_overview_fails_before_connecting() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("du.txt"), "h\n1\t/d/projA\n")?;
        fs::write(dir.path().join("overview.csv"), "project;group\nprojA;G\n")?;

        let registry = registry();
        let counters = registry.counters();
        let mut req = request(&dir, &["du.txt"]);
        req.overview_path = Some(dir.path().join("overview.csv"));

        let err = run_batch(&registry, &req).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiskUsageError>(),
            Some(DiskUsageError::OverviewFormat { .. })
        ));
        assert_eq!(counters.connects(), 0);
        Ok(())
    }

    #[test]
    fn header_only_overview_reports_no_projects() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("du.txt"), "h\n1\t/d/projA\n2\t/d/projB\n")?;
        fs::write(dir.path().join("overview.csv"), "substudy;main_study\n")?;

        let registry = registry().with_project(ProjectRecord {
            id: "projB".into(),
            name: "Study B".into(),
            ..Default::default()
        });
        let counters = registry.counters();
        let mut req = request(&dir, &["du.txt"]);
        req.overview_path = Some(dir.path().join("overview.csv"));

        let summary = run_batch(&registry, &req)?;
        let report = &summary.reports[0];
        assert_eq!(report.parsed, 2);
        assert_eq!(report.rows, 0);
        assert!(report.missing_substudies.is_empty());
        assert_eq!(counters.lookups(), 0);
        assert_eq!(fs::read_to_string(&report.output_path)?.lines().count(), 1);
        Ok(())
    }

    #[test]
    fn refused_connection_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("du.txt"), "h\n1\t/d/projA\n")?;

        let registry = registry().refusing_connections();
        let err = run_batch(&registry, &request(&dir, &["du.txt"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DiskUsageError>(),
            Some(DiskUsageError::Connect { .. })
        ));
        assert!(!dir.path().join("out").exists());
        Ok(())
    }
}
