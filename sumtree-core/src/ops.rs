use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::manifest::Manifest;
use crate::progress::Progress;
use crate::reconcile::{compute_diff, hash_current, DiffResult};
use crate::scan::{self, ScanOptions};

/// Which operation a run performs; also selects the report wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Create,
    Verify,
    Reset,
}

#[derive(Debug, Clone)]
pub struct OpOptions {
    pub scan: ScanOptions,
    /// create only: rewrite directories that already carry a sumfile.
    pub overwrite: bool,
}

/// Outcome for one directory. `dir` is relative to the run root
/// ("." for the root itself).
#[derive(Debug, Clone, Serialize)]
pub struct DirReport {
    pub dir: String,
    pub diff: DiffResult,
    /// create refused this directory because a sumfile already exists
    pub refused: bool,
    /// a sumfile was written here (create/reset)
    pub written: bool,
    /// a stale sumfile was deleted here (reset in an emptied directory)
    pub pruned: bool,
}

impl DirReport {
    fn with_diff(diff: DiffResult) -> Self {
        Self {
            dir: String::new(),
            diff,
            refused: false,
            written: false,
            pruned: false,
        }
    }
}

/// A path that could not be traversed, read, or written, with the
/// underlying error. These never abort the run; they fail it at exit.
#[derive(Debug, Clone, Serialize)]
pub struct PathError {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: Mode,
    pub root: String,
    pub created_utc: String,
    pub dirs: Vec<DirReport>,
    pub errors: Vec<PathError>,
}

/// Flat counts over a whole run, for summaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Totals {
    pub unchanged: usize,
    pub modified: usize,
    pub added: usize,
    pub missing: usize,
    pub unreadable: usize,
    pub written: usize,
    pub pruned: usize,
    pub refused: usize,
}

impl RunReport {
    fn new(mode: Mode, root: &Path) -> Self {
        Self {
            mode,
            root: root.display().to_string(),
            created_utc: chrono::Utc::now().to_rfc3339(),
            dirs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn totals(&self) -> Totals {
        let mut t = Totals::default();
        for d in &self.dirs {
            t.unchanged += d.diff.unchanged.len();
            t.modified += d.diff.modified.len();
            t.added += d.diff.added.len();
            t.missing += d.diff.missing.len();
            t.unreadable += d.diff.unreadable.len();
            t.written += usize::from(d.written);
            t.pruned += usize::from(d.pruned);
            t.refused += usize::from(d.refused);
        }
        t
    }

    /// Exit-status predicate. Modified/Missing/Unreadable fail a verify;
    /// refusals and per-path I/O errors fail any mode. Added never fails.
    pub fn failed(&self) -> bool {
        if !self.errors.is_empty() {
            return true;
        }
        self.dirs.iter().any(|d| {
            d.refused
                || match self.mode {
                    Mode::Verify => d.diff.has_failures(),
                    Mode::Create | Mode::Reset => !d.diff.unreadable.is_empty(),
                }
        })
    }
}

fn rel_dir(root: &Path, dir: &Path) -> String {
    match pathdiff::diff_paths(dir, root) {
        Some(p) if p.as_os_str().is_empty() => ".".to_string(),
        Some(p) => p.to_string_lossy().replace('\\', "/"),
        None => dir.to_string_lossy().replace('\\', "/"),
    }
}

pub fn create(root: &Path, opts: &OpOptions, prog: &Progress) -> Result<RunReport> {
    run(Mode::Create, root, opts, prog)
}

pub fn verify(root: &Path, opts: &OpOptions, prog: &Progress) -> Result<RunReport> {
    run(Mode::Verify, root, opts, prog)
}

pub fn reset(root: &Path, opts: &OpOptions, prog: &Progress) -> Result<RunReport> {
    run(Mode::Reset, root, opts, prog)
}

/// Walk every directory under `root` and apply the per-directory policy.
/// Per directory the state machine is list -> diff -> report (+ write for
/// create/reset); a directory that errors is reported and the walk goes
/// on.
pub fn run(mode: Mode, root: &Path, opts: &OpOptions, prog: &Progress) -> Result<RunReport> {
    let walked = scan::walk(root, &opts.scan)?;
    let mut report = RunReport::new(mode, root);
    for (path, error) in walked.errors {
        report.errors.push(PathError {
            path: path.display().to_string(),
            error,
        });
    }

    if mode == Mode::Verify && !walked.dirs.iter().any(|d| Manifest::exists(d)) {
        bail!(
            "no sumfile found under {} (run `sumtree create` first)",
            root.display()
        );
    }

    prog.set_stage(match mode {
        Mode::Create => "Hashing",
        Mode::Verify => "Verifying",
        Mode::Reset => "Rehashing",
    });

    for dir in &walked.dirs {
        let outcome = match mode {
            Mode::Create => create_dir(dir, opts, prog),
            Mode::Verify => verify_dir(dir, &opts.scan, prog),
            Mode::Reset => reset_dir(dir, &opts.scan, prog),
        };
        prog.inc_dir();
        match outcome {
            Ok(Some(mut dr)) => {
                dr.dir = rel_dir(root, dir);
                report.dirs.push(dr);
            }
            Ok(None) => {}
            Err(e) => report.errors.push(PathError {
                path: dir.display().to_string(),
                error: format!("{e:#}"),
            }),
        }
    }
    Ok(report)
}

/// create: every eligible file becomes an Added record in a fresh
/// manifest. A directory that already has a sumfile is refused unless
/// overwriting was requested; a directory with no eligible files gets no
/// sumfile at all.
fn create_dir(dir: &Path, opts: &OpOptions, prog: &Progress) -> Result<Option<DirReport>> {
    let names = scan::list_dir(dir, &opts.scan)?;
    if names.is_empty() {
        return Ok(None);
    }
    if !opts.overwrite && Manifest::exists(dir) {
        let mut dr = DirReport::with_diff(DiffResult::default());
        dr.refused = true;
        return Ok(Some(dr));
    }

    let (entries, unreadable) = hash_current(dir, &names, prog);
    let mut diff = DiffResult::default();
    diff.added = entries.keys().cloned().collect();
    diff.unreadable = unreadable;

    let mut dr = DirReport::with_diff(diff);
    if !entries.is_empty() {
        let manifest = Manifest { entries };
        manifest.save(dir)?;
        dr.written = true;
    }
    Ok(Some(dr))
}

/// verify: diff only, never writes. A directory without a sumfile has
/// nothing to compare against, so its files all classify Added.
fn verify_dir(dir: &Path, scan_opts: &ScanOptions, prog: &Progress) -> Result<Option<DirReport>> {
    let names = scan::list_dir(dir, scan_opts)?;
    let Some(prior) = Manifest::load(dir)? else {
        if names.is_empty() {
            return Ok(None);
        }
        let mut diff = DiffResult::default();
        diff.added = names;
        return Ok(Some(DirReport::with_diff(diff)));
    };

    let diff = compute_diff(dir, &names, &prior, prog);
    if diff.is_empty() {
        return Ok(None);
    }
    Ok(Some(DirReport::with_diff(diff)))
}

/// reset: one hashing pass serves both the audit diff against the old
/// records and the fresh manifest. The manifest afterwards mirrors disk
/// exactly; a directory that lost all its files loses its sumfile too.
fn reset_dir(dir: &Path, scan_opts: &ScanOptions, prog: &Progress) -> Result<Option<DirReport>> {
    let names = scan::list_dir(dir, scan_opts)?;
    let prior = Manifest::load(dir)?;

    if names.is_empty() {
        let Some(prior) = prior else {
            return Ok(None);
        };
        let pruned = Manifest::remove(dir)?;
        let mut diff = DiffResult::default();
        diff.missing = prior.entries.into_keys().collect();
        let mut dr = DirReport::with_diff(diff);
        dr.pruned = pruned;
        return Ok(Some(dr));
    }

    let (entries, unreadable) = hash_current(dir, &names, prog);
    let prior_entries = prior.map(|p| p.entries).unwrap_or_default();
    let name_set: BTreeSet<&str> = names.iter().map(String::as_str).collect();

    let mut diff = DiffResult::default();
    for (name, digest) in &entries {
        match prior_entries.get(name) {
            None => diff.added.push(name.clone()),
            Some(old) if old == digest => diff.unchanged.push(name.clone()),
            Some(_) => diff.modified.push(name.clone()),
        }
    }
    diff.missing = prior_entries
        .keys()
        .filter(|k| !name_set.contains(k.as_str()))
        .cloned()
        .collect();
    diff.unreadable = unreadable;

    let mut dr = DirReport::with_diff(diff);
    if !entries.is_empty() {
        let manifest = Manifest { entries };
        manifest.save(dir)?;
        dr.written = true;
    }
    Ok(Some(dr))
}
