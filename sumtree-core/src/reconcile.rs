use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::hash::{hash_file, hex};
use crate::manifest::Manifest;
use crate::progress::Progress;

/// The four mutually exclusive reconciliation classes, plus the files that
/// sit on disk and in the manifest but whose bytes could not be read.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    pub unchanged: Vec<String>,
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub missing: Vec<String>,
    pub unreadable: Vec<String>,
}

impl DiffResult {
    /// True when verify must fail on this directory. Added is a warning,
    /// not a failure: there is nothing to compare an untracked file
    /// against.
    pub fn has_failures(&self) -> bool {
        !self.modified.is_empty() || !self.missing.is_empty() || !self.unreadable.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.unchanged.is_empty()
            && self.modified.is_empty()
            && self.added.is_empty()
            && self.missing.is_empty()
            && self.unreadable.is_empty()
    }
}

enum Outcome {
    Same,
    Differs,
    Unreadable,
}

/// Classify the current file names of `dir` against its stored records.
///
/// Hashing is lazy: only names present both on disk and in the manifest
/// are hashed (Added and Missing need no digest), in parallel across the
/// directory's files. Classification is assembled only after every hash
/// has completed.
pub fn compute_diff(dir: &Path, current: &[String], prior: &Manifest, prog: &Progress) -> DiffResult {
    let current_set: BTreeSet<&str> = current.iter().map(String::as_str).collect();

    let mut diff = DiffResult::default();
    let mut tracked: Vec<&str> = Vec::new();
    for name in current {
        if prior.entries.contains_key(name.as_str()) {
            tracked.push(name);
        } else {
            diff.added.push(name.clone());
        }
    }
    for name in prior.entries.keys() {
        if !current_set.contains(name.as_str()) {
            diff.missing.push(name.clone());
        }
    }

    prog.add_files_total(tracked.len());
    let outcomes: Vec<(&str, Outcome)> = tracked
        .par_iter()
        .map(|name| {
            let out = match hash_file(&dir.join(name)) {
                Ok(h) if hex(&h) == prior.entries[*name] => Outcome::Same,
                Ok(_) => Outcome::Differs,
                Err(_) => Outcome::Unreadable,
            };
            prog.inc_file();
            (*name, out)
        })
        .collect();
    for (name, out) in outcomes {
        match out {
            Outcome::Same => diff.unchanged.push(name.to_string()),
            Outcome::Differs => diff.modified.push(name.to_string()),
            Outcome::Unreadable => diff.unreadable.push(name.to_string()),
        }
    }
    diff
}

/// Hash every name in `current` for a fresh manifest (create/reset path).
/// Unreadable files are skipped and returned separately; they get no
/// record.
pub fn hash_current(
    dir: &Path,
    current: &[String],
    prog: &Progress,
) -> (BTreeMap<String, String>, Vec<String>) {
    prog.add_files_total(current.len());
    let hashed: Vec<(String, Option<String>)> = current
        .par_iter()
        .map(|name| {
            let digest = hash_file(&dir.join(name)).ok().map(|h| hex(&h));
            prog.inc_file();
            (name.clone(), digest)
        })
        .collect();
    let mut entries = BTreeMap::new();
    let mut unreadable = Vec::new();
    for (name, digest) in hashed {
        match digest {
            Some(d) => {
                entries.insert(name, d);
            }
            None => unreadable.push(name),
        }
    }
    (entries, unreadable)
}
