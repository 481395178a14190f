pub mod batch;
pub mod dispatch;
pub mod error;
pub mod join;
pub mod overview;
pub mod report;
pub mod write;
pub mod xnat;

pub use batch::{run_batch, BatchRequest, BatchSummary, ReportResult};
pub use error::DiskUsageError;
pub use overview::{load_overview, Overview};
pub use report::{parse_report, UsageEntry};
pub use write::{write_report, OutputRow, ReportKey};
pub use xnat::{Credentials, Investigator, ProjectRecord, Registry, RegistrySession};
