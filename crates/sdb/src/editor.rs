//! Editing notes in `$EDITOR`

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

const DEFAULT_EDITOR: &str = "vim";

/// Let the user edit `current` in `$EDITOR` and return the result
pub fn edit_in_editor(current: &str) -> Result<String> {
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| DEFAULT_EDITOR.to_string());
    edit_with(&editor, current)
}

/// Run `editor` (a program plus optional arguments) on a private copy of
/// `current`. The copy is zeroed before it is removed.
pub fn edit_with(editor: &str, current: &str) -> Result<String> {
    let mut words = editor.split_whitespace();
    let Some(program) = words.next() else {
        bail!("No editor configured");
    };

    let mut file = tempfile::Builder::new()
        .prefix("sdb-notes-")
        .tempfile()
        .context("Failed to create temporary notes file")?;
    let _scrub = Scrub(file.path().to_path_buf());
    file.write_all(current.as_bytes())?;
    file.flush()?;

    debug!(editor = program, "launching editor");
    let status = Command::new(program)
        .args(words)
        .arg(file.path())
        .status()
        .with_context(|| format!("Failed to run editor {}", program))?;
    if !status.success() {
        bail!("Editor {} exited with {}", program, status);
    }

    fs::read_to_string(file.path()).context("Failed to read back edited notes")
}

/// Overwrites the file at the path with zero bytes when dropped
struct Scrub(PathBuf);

impl Drop for Scrub {
    fn drop(&mut self) {
        if let Err(e) = scrub(&self.0) {
            warn!(error = %e, "failed to scrub temporary notes file");
        }
    }
}

fn scrub(path: &Path) -> std::io::Result<()> {
    let len = fs::metadata(path)?.len() as usize;
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(&vec![0u8; len])?;
    file.sync_all()
}
