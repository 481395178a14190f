use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds raised by the disk-usage pipeline.
///
/// These travel inside `anyhow::Error`; callers that need to branch on the
/// kind use `err.downcast_ref::<DiskUsageError>()`.
#[derive(Debug, Error)]
pub enum DiskUsageError {
    #[error("malformed report {path:?} at line {line}: {reason}")]
    MalformedReport {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("malformed study overview {path:?}: {reason}")]
    OverviewFormat { path: PathBuf, reason: String },
    #[error("invalid XNAT url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("lookup of project '{project_id}' failed with HTTP {status}")]
    Lookup { project_id: String, status: u16 },
}
