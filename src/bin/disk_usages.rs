//! disk_usages: turn `du` reports of the XNAT archive into per-project
//! billing/ownership CSVs.
//!
//! Each `--report_path` is a tab-separated `du` output (header line, then
//! `size_mb<TAB>project_dir`). Every project directory is looked up in XNAT
//! and written out with its name and PI under `--output_folder` (default
//! `./output`) as `<date>_<report>_XNAT_Disk_usage.csv`.
//!
//! With `--study_overview overview.csv` (`substudy;main_study`), only listed
//! substudies are reported, each tagged with its main study, and substudies
//! with no row are listed at the end of each report.

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use std::{
    env,
    io::{self, BufRead, Write},
    path::PathBuf,
    time::Duration,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use xnat_scripts::{
    run_batch,
    xnat::{ClientSettings, XnatRegistry},
    BatchRequest, Credentials,
};

const PASSWORD_ENV: &str = "XNAT_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about = "Extract XNAT disk usage information")]
struct Args {
    /// URL for the XNAT instance (e.g. https://xnat.health-ri.nl)
    #[arg(long = "xnat_url")]
    xnat_url: String,

    /// Disk usage report(s); each one produces its own output file
    #[arg(long = "report_path", num_args = 1.., required = true)]
    report_paths: Vec<PathBuf>,

    /// `;`-separated study overview with `substudy` and `main_study` columns
    #[arg(long = "study_overview")]
    study_overview: Option<PathBuf>,

    /// Custom output folder
    #[arg(long = "output_folder")]
    output_folder: Option<PathBuf>,

    /// XNAT username; prompted for when absent
    #[arg(long, env = "XNAT_USER")]
    user: Option<String>,

    /// HTTP timeout per request, in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let credentials = read_credentials(args.user)?;

    let request = BatchRequest {
        xnat_url: args.xnat_url,
        credentials,
        report_paths: args.report_paths,
        overview_path: args.study_overview,
        output_dir: args.output_folder,
        date: Local::now().date_naive(),
    };
    let registry = XnatRegistry::new(ClientSettings {
        timeout: Duration::from_secs(args.timeout),
        ..Default::default()
    });

    info!("startup");
    let summary = run_batch(&registry, &request)?;

    println!(
        "\nProcessed {} reports, generated {} output files:",
        request.report_paths.len(),
        summary.reports.len()
    );
    for path in summary.output_paths() {
        println!("  - {}", path.display());
    }
    Ok(())
}

/// Password comes from `XNAT_PASSWORD` or a masked prompt, never from argv.
fn read_credentials(user: Option<String>) -> Result<Credentials> {
    let user = match user {
        Some(user) => user,
        None => {
            print!("Enter your XNAT username: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("reading username")?;
            line.trim().to_string()
        }
    };
    if user.is_empty() {
        bail!("no XNAT username given");
    }

    let password = match env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Enter your XNAT password: ")
            .context("reading password")?,
    };
    Ok(Credentials::new(user, password))
}
