use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use sumtree_core::localize::FluentLoc;
use sumtree_core::ops::{self, Mode, OpOptions, RunReport};
use sumtree_core::progress::Progress;
use sumtree_core::scan::ScanOptions;

#[derive(Parser)]
#[command(name = "sumtree", version, about = "Maintain per-directory blake3 sumfiles recursively")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct CommonArgs {
    /// Include hidden (dot) files and directories
    #[arg(long)]
    include_hidden: bool,
    /// Extra name patterns to skip (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,
    /// Periodic progress on stderr
    #[arg(long, default_value_t = false)]
    progress: bool,
    /// Emit the full report as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
    /// The starting directory
    root: PathBuf,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write sumfiles for every directory with files
    Create {
        /// Overwrite directories that already carry a sumfile
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Check current files against the recorded checksums
    Verify {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Recompute every checksum and rewrite the sumfiles
    Reset {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();
    let (mode, force, common) = match cli.cmd {
        Cmd::Create { force, common } => (Mode::Create, force, common),
        Cmd::Verify { common } => (Mode::Verify, false, common),
        Cmd::Reset { common } => (Mode::Reset, false, common),
    };
    let opts = OpOptions {
        scan: ScanOptions::new(common.include_hidden, &common.exclude)?,
        overwrite: force,
    };

    let prog = Progress::new(common.progress);
    prog.start();
    let report = ops::run(mode, &common.root, &opts, &prog);
    prog.stop();
    let report = report?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &common.root);
    }
    Ok(report.failed())
}

/// Show a path the way the user addressed the tree: as given when the root
/// was relative, relative to the current directory when it was absolute.
fn display_path(root: &Path, dir: &str, name: &str) -> String {
    let mut p = root.to_path_buf();
    if dir != "." {
        p = p.join(dir);
    }
    if !name.is_empty() {
        p = p.join(name);
    }
    let p = if p.is_absolute() {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| pathdiff::diff_paths(&p, cwd))
            .unwrap_or(p)
    } else {
        p
    };
    p.to_string_lossy().replace('\\', "/")
}

fn print_report(report: &RunReport, root: &Path) {
    let loc = FluentLoc::builtin("en-GB");
    for d in &report.dirs {
        if d.refused {
            println!("{}", loc.msg("report-refused", &[("path", &display_path(root, &d.dir, ""))]));
            continue;
        }
        for name in &d.diff.modified {
            println!("{}", loc.msg("report-modified", &[("path", &display_path(root, &d.dir, name))]));
        }
        for name in &d.diff.missing {
            println!("{}", loc.msg("report-missing", &[("path", &display_path(root, &d.dir, name))]));
        }
        for name in &d.diff.unreadable {
            println!("{}", loc.msg("report-unreadable", &[("path", &display_path(root, &d.dir, name))]));
        }
        for name in &d.diff.added {
            println!("{}", loc.msg("report-added", &[("path", &display_path(root, &d.dir, name))]));
        }
        if d.pruned {
            println!("{}", loc.msg("report-pruned", &[("path", &display_path(root, &d.dir, ""))]));
        }
    }
    for e in &report.errors {
        eprintln!("{}", loc.msg("report-error", &[("path", &e.path), ("error", &e.error)]));
    }

    let t = report.totals();
    let rootstr = display_path(root, ".", "");
    match report.mode {
        Mode::Create => {
            eprintln!(
                "{}",
                loc.msg(
                    "create-summary",
                    &[("written", &t.written.to_string()), ("root", &rootstr)]
                )
            );
        }
        Mode::Reset => {
            eprintln!(
                "{}",
                loc.msg(
                    "reset-summary",
                    &[
                        ("written", &t.written.to_string()),
                        ("pruned", &t.pruned.to_string()),
                        ("root", &rootstr),
                    ]
                )
            );
        }
        Mode::Verify => {
            let checked = t.unchanged + t.modified + t.unreadable;
            eprintln!(
                "{}",
                loc.msg(
                    "verify-summary",
                    &[
                        ("checked", &checked.to_string()),
                        ("modified", &t.modified.to_string()),
                        ("missing", &t.missing.to_string()),
                        ("unreadable", &t.unreadable.to_string()),
                        ("added", &t.added.to_string()),
                    ]
                )
            );
            let verdict = if report.failed() { "verify-fail" } else { "verify-pass" };
            println!("{}", loc.msg(verdict, &[]));
        }
    }
}
