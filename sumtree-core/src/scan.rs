use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::manifest::SUMFILE_NAME;

/// Directory names never descended into, regardless of flags.
const EXCLUDED_DIRS: &[&str] = &["$RECYCLE.BIN", "System Volume Information"];

/// File names never listed: the sumfile itself plus Explorer droppings.
const EXCLUDED_FILES: &[&str] = &["desktop.ini", SUMFILE_NAME];

/// Hidden means a leading dot.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// What the lister skips: hidden entries (unless enabled) and name
/// patterns, matched against the bare entry name like the original tool's
/// fnmatch sets.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_hidden: bool,
    file_excludes: GlobSet,
    dir_excludes: GlobSet,
}

impl ScanOptions {
    /// Built-in exclusions plus `extra` user patterns (applied to both
    /// files and directories).
    pub fn new(include_hidden: bool, extra_excludes: &[String]) -> Result<Self> {
        let mut files = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();
        for pat in EXCLUDED_FILES {
            files.add(Glob::new(pat)?);
        }
        for pat in EXCLUDED_DIRS {
            dirs.add(Glob::new(pat)?);
        }
        for pat in extra_excludes {
            let g = Glob::new(pat).with_context(|| format!("bad exclude pattern {pat:?}"))?;
            files.add(g.clone());
            dirs.add(g);
        }
        Ok(Self {
            include_hidden,
            file_excludes: files.build()?,
            dir_excludes: dirs.build()?,
        })
    }

    fn skip_file(&self, name: &str) -> bool {
        self.file_excludes.is_match(name) || (!self.include_hidden && is_hidden(name))
    }

    fn skip_dir(&self, name: &str) -> bool {
        self.dir_excludes.is_match(name) || (!self.include_hidden && is_hidden(name))
    }
}

/// Names of the regular files directly inside `dir`, sorted.
///
/// Symlinks and anything that is not a regular file are left out, as are
/// names that are not valid UTF-8 (the sumfile line format cannot carry
/// them).
pub fn list_dir(dir: &Path, opts: &ScanOptions) -> Result<Vec<String>> {
    let rd = std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    let mut names = Vec::new();
    for ent in rd {
        let ent = ent.with_context(|| format!("read dir {}", dir.display()))?;
        let ft = ent
            .file_type()
            .with_context(|| format!("stat {}", ent.path().display()))?;
        if !ft.is_file() {
            continue;
        }
        let Ok(name) = ent.file_name().into_string() else {
            continue;
        };
        if opts.skip_file(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// A directory walk: the directories to visit plus the subtrees that could
/// not be read (reported, never fatal).
#[derive(Debug)]
pub struct Walked {
    pub dirs: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

/// Directories under `root`, root first, deterministic order. Hidden and
/// excluded directories are pruned; directory symlinks are never followed.
/// The explicitly given root is always visited, hidden or not.
pub fn walk(root: &Path, opts: &ScanOptions) -> Result<Walked> {
    if !root.is_dir() {
        bail!("root directory not found: {}", root.display());
    }
    let mut dirs = Vec::new();
    let mut errors = Vec::new();
    let opts = opts.clone();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            !opts.skip_dir(&e.file_name().to_string_lossy())
        });
    for ent in walker {
        match ent {
            Ok(e) if e.file_type().is_dir() => dirs.push(e.into_path()),
            Ok(_) => {}
            Err(e) => {
                let p = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                errors.push((p, e.to_string()));
            }
        }
    }
    Ok(Walked { dirs, errors })
}
