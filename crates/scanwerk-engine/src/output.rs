// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Staged output files. Assembly writes next to each destination; nothing
// replaces a live file until the record that points at it is committed, and
// the file being replaced is kept until then so it can be put back.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Hidden sibling of `target`: `.<name>.<uuid>.<tag>`.
fn sibling(target: &Path, tag: &str) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_default());
    name.push(format!(".{}.{tag}", uuid::Uuid::new_v4().simple()));
    target.with_file_name(name)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove file");
        }
    }
}

/// One file waiting to replace `target`.
///
/// Dropping an unsettled file puts back whatever it replaced and deletes
/// the staged copy.
#[derive(Debug)]
pub struct StagedFile {
    staged: PathBuf,
    target: PathBuf,
    backup: Option<PathBuf>,
    placed: bool,
    settled: bool,
}

impl StagedFile {
    /// Reserve a staging path for `target`. Nothing is written yet.
    pub fn new(target: &Path) -> Self {
        Self {
            staged: sibling(target, "staged"),
            target: target.to_owned(),
            backup: None,
            placed: false,
            settled: false,
        }
    }

    /// Stage `bytes` for `target`, synced to disk.
    pub fn write(target: &Path, bytes: &[u8]) -> io::Result<Self> {
        let file = Self::new(target);
        let mut out = File::create(&file.staged)?;
        out.write_all(bytes)?;
        out.sync_all()?;
        Ok(file)
    }

    pub fn staged_path(&self) -> &Path {
        &self.staged
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the staged file onto its target. A file already there is moved
    /// aside, not deleted.
    fn place(&mut self) -> io::Result<()> {
        if self.placed {
            return Ok(());
        }
        if self.target.exists() {
            let backup = sibling(&self.target, "previous");
            fs::rename(&self.target, &backup)?;
            self.backup = Some(backup);
        }
        if let Err(e) = fs::rename(&self.staged, &self.target) {
            self.restore_backup();
            return Err(e);
        }
        self.placed = true;
        Ok(())
    }

    /// Undo `place`.
    fn unplace(&mut self) {
        if self.placed {
            if let Err(e) = fs::rename(&self.target, &self.staged) {
                warn!(path = %self.target.display(), error = %e, "could not take back new file");
            }
            self.placed = false;
        }
        self.restore_backup();
    }

    fn restore_backup(&mut self) {
        if let Some(backup) = self.backup.take() {
            if let Err(e) = fs::rename(&backup, &self.target) {
                warn!(path = %self.target.display(), error = %e, "could not restore previous file");
            }
        }
    }

    /// The new file is final: drop the one it replaced.
    fn settle(&mut self) {
        if let Some(backup) = self.backup.take() {
            remove_quietly(&backup);
        }
        self.settled = true;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.unplace();
        remove_quietly(&self.staged);
    }
}

/// The files of one assembly, committed or reverted together.
#[derive(Debug)]
pub struct StagedOutput {
    files: Vec<StagedFile>,
}

impl StagedOutput {
    pub fn new(files: Vec<StagedFile>) -> Self {
        Self { files }
    }

    /// Move every file into place. On failure the ones already moved are
    /// taken back and the previous files restored.
    pub fn commit(&mut self) -> io::Result<()> {
        for i in 0..self.files.len() {
            if let Err(e) = self.files[i].place() {
                self.revert();
                return Err(e);
            }
        }
        debug!(files = self.files.len(), "output moved into place");
        Ok(())
    }

    /// Undo `commit`, keeping the staged copies for another attempt.
    pub fn revert(&mut self) {
        for file in self.files.iter_mut().rev() {
            file.unplace();
        }
    }

    /// Make a commit final.
    pub fn settle(mut self) {
        for file in &mut self.files {
            file.settle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn commit_replaces_and_settle_drops_previous() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        fs::write(&target, b"old").unwrap();

        let mut output = StagedOutput::new(vec![StagedFile::write(&target, b"new").unwrap()]);
        assert_eq!(fs::read(&target).unwrap(), b"old");

        output.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        output.settle();
        assert_eq!(names(dir.path()), vec!["doc.pdf"]);
    }

    #[test]
    fn revert_restores_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        fs::write(&target, b"old").unwrap();

        let mut output = StagedOutput::new(vec![StagedFile::write(&target, b"new").unwrap()]);
        output.commit().unwrap();
        output.revert();
        assert_eq!(fs::read(&target).unwrap(), b"old");

        // The staged copy survives for a retry.
        output.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        output.settle();
    }

    #[test]
    fn failed_commit_puts_earlier_files_back() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("doc.pdf");
        fs::write(&first, b"old").unwrap();
        let staged_first = StagedFile::write(&first, b"new").unwrap();
        // Staged path of the second file is never written, so placing it fails.
        let second = StagedFile::new(&dir.path().join("thumb.jpg"));

        let mut output = StagedOutput::new(vec![staged_first, second]);
        assert!(output.commit().is_err());
        assert_eq!(fs::read(&first).unwrap(), b"old");
        assert!(!dir.path().join("thumb.jpg").exists());
    }

    #[test]
    fn dropping_unsettled_output_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("doc.pdf");
        fs::write(&target, b"old").unwrap();

        let mut output = StagedOutput::new(vec![StagedFile::write(&target, b"new").unwrap()]);
        output.commit().unwrap();
        drop(output);

        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert_eq!(names(dir.path()), vec!["doc.pdf"]);
    }
}
