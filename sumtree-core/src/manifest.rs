use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

/// Sumfile name used inside every described directory.
pub const SUMFILE_NAME: &str = ".checksums.blake3";

/// Separates the hex digest from the file name on each record line.
pub const SUMFILE_DELIMITER: &str = "  ";

/// First line of every sumfile. Doubles as the policy marker: `create`
/// refuses a directory that already carries one of these, `reset` (or
/// `create --force`) rewrites it.
const SUMFILE_HEADER: &str =
    "# sumtree v1 blake3 sumfile; create refuses to overwrite, use reset or --force";

const DIGEST_HEX_LEN: usize = 64;

/// Checksum records of exactly one directory: file name -> lowercase hex
/// BLAKE3 digest. The map keeps entries sorted so equal content always
/// serializes to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn sumfile_path(dir: &Path) -> PathBuf {
        dir.join(SUMFILE_NAME)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::sumfile_path(dir).is_file()
    }

    /// Entry names are bare file names within one directory. Anything that
    /// could point elsewhere (absolute paths, `..`, multiple components) is
    /// refused before any disk access, as is anything the line format
    /// cannot carry.
    pub fn validate_entry_name(name: &str) -> Result<()> {
        if name.is_empty() {
            bail!("empty entry name");
        }
        if name.contains('\n') || name.contains('\r') {
            bail!("entry name contains a line break: {name:?}");
        }
        let p = Path::new(name);
        if p.is_absolute() {
            bail!("absolute entry name not allowed: {name:?}");
        }
        let mut comps = p.components();
        match (comps.next(), comps.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => bail!("entry name must be a bare file name: {name:?}"),
        }
    }

    /// Read the sumfile of `dir`. `Ok(None)` when there is none; malformed
    /// lines, bad digests, duplicate or unsafe names are hard errors naming
    /// the offending line.
    pub fn load(dir: &Path) -> Result<Option<Manifest>> {
        let path = Self::sumfile_path(dir);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };
        let mut entries = BTreeMap::new();
        for (idx, line) in BufReader::new(f).lines().enumerate() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            let line = line.trim_end_matches('\r');
            let lead = line.trim_start();
            if lead.is_empty() || lead.starts_with('#') || lead.starts_with(';') {
                continue;
            }
            let Some((digest, name)) = line.split_once(SUMFILE_DELIMITER) else {
                bail!("{}:{}: malformed record line", path.display(), idx + 1);
            };
            if digest.len() != DIGEST_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                bail!("{}:{}: bad digest {:?}", path.display(), idx + 1, digest);
            }
            Self::validate_entry_name(name)
                .with_context(|| format!("{}:{}", path.display(), idx + 1))?;
            if entries.insert(name.to_string(), digest.to_ascii_lowercase()).is_some() {
                bail!("{}:{}: duplicate entry {:?}", path.display(), idx + 1, name);
            }
        }
        Ok(Some(Manifest { entries }))
    }

    /// Replace the sumfile of `dir`: serialize fully, write a temp file in
    /// the same directory, rename over the target. An exclusive advisory
    /// lock on the target serializes concurrent writers; interruption can
    /// never leave a half-written sumfile behind.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = Self::sumfile_path(dir);
        for name in self.entries.keys() {
            Self::validate_entry_name(name)?;
        }
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("lock {}", path.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("temp file in {}", dir.display()))?;
        writeln!(tmp, "{SUMFILE_HEADER}")?;
        for (name, digest) in &self.entries {
            writeln!(tmp, "{digest}{SUMFILE_DELIMITER}{name}")?;
        }
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("replace {}", path.display()))?;
        let _ = lock.unlock();
        Ok(())
    }

    /// Delete the sumfile of `dir` if present; reports whether it existed.
    pub fn remove(dir: &Path) -> Result<bool> {
        let path = Self::sumfile_path(dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
        }
    }
}
