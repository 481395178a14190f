use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, ffi::OsString, path::PathBuf, process::ExitCode};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};
use xnat_scripts::dispatch::{Dispatcher, DEFAULT_WORKDIR, SCRIPTS_DIR_ENV, WORKDIR_ENV};

/// Run one of the bundled XNAT maintenance scripts inside the data directory.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    allow_external_subcommands = true,
    disable_help_subcommand = true,
    override_usage = "xnat-scripts <script_name> [script_args...]"
)]
struct Args {
    #[command(subcommand)]
    script: Option<Script>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Script {
    /// Script name followed by its arguments, passed on untouched
    #[command(external_subcommand)]
    Run(Vec<OsString>),
}

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    // ─── 1) locate scripts + working dir ─────────────────────────────
    let exe = env::current_exe().context("locating the dispatcher binary")?;
    let scripts_dir = match env::var_os(SCRIPTS_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => exe
            .parent()
            .map(PathBuf::from)
            .context("dispatcher binary has no parent directory")?,
    };
    let workdir = env::var_os(WORKDIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR));

    let mut dispatcher = Dispatcher::new(scripts_dir, workdir);
    if let Some(own) = exe.file_name().and_then(|n| n.to_str()) {
        dispatcher = dispatcher.excluding(own);
    }
    debug!(?dispatcher, "dispatcher configured");

    // ─── 2) no script: usage + listing ───────────────────────────────
    let Some(Script::Run(mut argv)) = args.script else {
        println!("Usage: docker run -v $(pwd):/data xnat-scripts <script_name> [script_args...]");
        println!("\nAvailable scripts:");
        for script in dispatcher.available_scripts()? {
            println!("  {}", script);
        }
        return Ok(ExitCode::from(1));
    };

    // ─── 3) run it ───────────────────────────────────────────────────
    let script_args = argv.split_off(1);
    let name = argv[0]
        .to_str()
        .context("script name is not valid UTF-8")?
        .to_string();
    let Some(script) = dispatcher.resolve(&name)? else {
        println!("Error: Script '{}' not found.", name);
        return Ok(ExitCode::from(1));
    };
    let code = dispatcher.run(&script, &script_args)?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(argv: &[&str]) -> Vec<OsString> {
        match Args::try_parse_from(argv).expect("dispatcher args").script {
            Some(Script::Run(args)) => args,
            None => panic!("no script parsed from {:?}", argv),
        }
    }

    #[test]
    fn help_and_version_after_script_reach_the_script() {
        for flag in ["--help", "-h", "--version", "-V"] {
            assert_eq!(
                forwarded(&["xnat-scripts", "disk_usages", flag]),
                vec![OsString::from("disk_usages"), OsString::from(flag)]
            );
        }
    }

    #[test]
    fn script_flags_are_forwarded_verbatim() {
        assert_eq!(
            forwarded(&[
                "xnat-scripts",
                "disk_usages.py",
                "--xnat_url",
                "https://xnat.example.org",
                "--report_path",
                "a.txt",
                "b.txt",
            ]),
            [
                "disk_usages.py",
                "--xnat_url",
                "https://xnat.example.org",
                "--report_path",
                "a.txt",
                "b.txt",
            ]
            .map(OsString::from)
            .to_vec()
        );
    }

    #[test]
    fn no_script_is_allowed() {
        let args = Args::try_parse_from(["xnat-scripts"]).expect("dispatcher args");
        assert_eq!(args.script, None);
    }

    #[test]
    fn help_before_script_is_the_dispatchers() {
        let err = Args::try_parse_from(["xnat-scripts", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
