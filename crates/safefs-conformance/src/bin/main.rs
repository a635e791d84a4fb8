//! CLI entrypoint for safefs conformance tooling. Runs every scenario from
//! the design document's testable-properties section and emits a
//! markdown/json report pair, without requiring a live FUSE mount.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use safefs_conformance::{render_markdown, run_all};

#[derive(Debug, Parser)]
#[command(name = "safefs-conformance", about = "Conformance tooling for safefs")]
struct Cli {
    /// Markdown report output path.
    #[arg(long, default_value = "safefs-conformance-report.md")]
    report_md: PathBuf,

    /// JSON report output path.
    #[arg(long, default_value = "safefs-conformance-report.json")]
    report_json: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let report = run_all();
    let markdown = render_markdown(&report);
    let json = match serde_json::to_string_pretty(&report) {
        Ok(j) => j,
        Err(err) => {
            eprintln!("safefs-conformance: failed to serialize report: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = fs::write(&cli.report_md, &markdown) {
        eprintln!("safefs-conformance: failed to write {}: {err}", cli.report_md.display());
        return ExitCode::FAILURE;
    }
    if let Err(err) = fs::write(&cli.report_json, &json) {
        eprintln!("safefs-conformance: failed to write {}: {err}", cli.report_json.display());
        return ExitCode::FAILURE;
    }

    println!("{markdown}");

    if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
