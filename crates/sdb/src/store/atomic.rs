//! Crash-safe replacement of a single file
//!
//! A replacement moves through four phases:
//!
//! | phase         | reached by        | on failure                          |
//! |---------------|-------------------|-------------------------------------|
//! | `Idle`        | [`AtomicReplace::begin`] | temp already exists: `Locked`, nothing touched |
//! | `TempWritten` | [`AtomicReplace::seal`]  | empty content: `EmptyResult`, temp removed     |
//! | `Verified`    | [`AtomicReplace::verify`] | check fails: temp removed                    |
//! | `Committed`   | [`AtomicReplace::commit`] | backup or rename fails: temp removed         |
//!
//! The temp file is owned by a guard that deletes it on every exit path
//! other than a successful rename, so the target is either the old bytes or
//! the new bytes, never anything in between. Exclusive creation of the temp
//! file is also the lock: a second transaction on the same target fails at
//! `begin` without touching anything.

use super::TransactionError;
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Transaction temp file for `dir/name`: `dir/.name.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    hidden_sibling(path, "tmp")
}

/// Backup file for `dir/name`: `dir/.name.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    hidden_sibling(path, "bak")
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.as_bytes())
        .unwrap_or_default();
    let trimmed: Vec<u8> = name.iter().copied().skip_while(|b| *b == b'.').collect();

    let mut sibling = Vec::with_capacity(trimmed.len() + suffix.len() + 2);
    sibling.push(b'.');
    sibling.extend_from_slice(&trimmed);
    sibling.push(b'.');
    sibling.extend_from_slice(suffix.as_bytes());
    path.with_file_name(OsString::from_vec(sibling))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    TempWritten,
    Verified,
    Committed,
}

/// Owns the temp file; removes it unless it was renamed into place
struct TempGuard {
    path: PathBuf,
    file: Option<File>,
    renamed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        self.file.take();
        if !self.renamed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}

/// One in-flight replacement of `target`
pub struct AtomicReplace {
    target: PathBuf,
    temp: TempGuard,
    previous: Option<Vec<u8>>,
    written: Vec<u8>,
    phase: Phase,
}

impl AtomicReplace {
    /// Take the lock by creating the temp file, then snapshot the current
    /// content of `target` (`None` if it does not exist yet).
    pub fn begin(target: &Path) -> Result<Self> {
        let temp_path = tmp_path(target);
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&temp_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                bail!(TransactionError::Locked(temp_path));
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create temp file {}", temp_path.display())
                });
            }
        };
        let temp = TempGuard {
            path: temp_path,
            file: Some(file),
            renamed: false,
        };

        let previous = match fs::read(target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", target.display()));
            }
        };

        debug!(target = %target.display(), exists = previous.is_some(), "lock acquired");
        Ok(Self {
            target: target.to_path_buf(),
            temp,
            previous,
            written: Vec::new(),
            phase: Phase::Idle,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Content of the target when the transaction began
    pub fn previous(&self) -> Option<&[u8]> {
        self.previous.as_deref()
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp.path
    }

    /// The temp file, for writing the new content
    pub fn file_mut(&mut self) -> Result<&mut File> {
        self.expect_phase(Phase::Idle)?;
        self.temp
            .file
            .as_mut()
            .context("temp file already closed")
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file_mut()?
            .write_all(bytes)
            .context("Failed to write temp file")
    }

    /// Flush the temp file to stable storage and read back what landed on
    /// disk. Refuses empty content.
    pub fn seal(&mut self) -> Result<&[u8]> {
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_all().context("Failed to sync temp file")?;
        file.seek(SeekFrom::Start(0))?;
        let mut written = Vec::new();
        file.read_to_end(&mut written)
            .context("Failed to read back temp file")?;

        if written.is_empty() {
            bail!(TransactionError::EmptyResult);
        }
        debug!(bytes = written.len(), "temp file written");
        self.written = written;
        self.phase = Phase::TempWritten;
        Ok(&self.written)
    }

    /// Run `check` against the sealed content
    pub fn verify<F>(&mut self, check: F) -> Result<()>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        self.expect_phase(Phase::TempWritten)?;
        check(&self.written)?;
        self.phase = Phase::Verified;
        Ok(())
    }

    /// Whether the sealed bytes differ from what the target held
    pub fn bytes_changed(&self) -> bool {
        self.previous.as_deref() != Some(self.written.as_slice())
    }

    /// Back up the previous content when `changed` is set, then rename the
    /// temp file over the target. The rename is the commit point.
    pub fn commit(mut self, changed: bool) -> Result<()> {
        self.expect_phase(Phase::Verified)?;

        if changed {
            if let Some(previous) = &self.previous {
                let backup = backup_path(&self.target);
                write_private(&backup, previous)
                    .with_context(|| format!("Failed to write backup {}", backup.display()))?;
                debug!(backup = %backup.display(), "previous content backed up");
            }
        }

        self.temp.file.take();
        fs::rename(&self.temp.path, &self.target).with_context(|| {
            format!(
                "Failed to move {} over {}",
                self.temp.path.display(),
                self.target.display()
            )
        })?;
        self.temp.renamed = true;
        self.phase = Phase::Committed;

        // make the rename itself durable; the commit already happened
        if let Some(parent) = self.target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!(error = %e, "could not sync parent directory");
            }
        }
        debug!(target = %self.target.display(), "committed");
        Ok(())
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        if self.phase != expected {
            bail!(
                "atomic replace step out of order: in {:?}, expected {:?}",
                self.phase,
                expected
            );
        }
        Ok(())
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Replace `target` with whatever `body` writes into the temp file
pub fn replace<F>(target: &Path, body: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let mut tx = AtomicReplace::begin(target)?;
    body(tx.file_mut()?)?;
    tx.seal()?;
    tx.verify(|_| Ok(()))?;
    let changed = tx.bytes_changed();
    tx.commit(changed)
}
