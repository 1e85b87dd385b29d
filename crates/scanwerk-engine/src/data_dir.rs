// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

use scanwerk_core::error::Result;

const APP_DIR: &str = "scanwerk";

/// Return the data directory, creating it if needed.
///
/// An explicit `override_dir` wins; otherwise `$XDG_DATA_HOME/scanwerk`,
/// then `~/.local/share/scanwerk`, then `/tmp/scanwerk`.
pub fn data_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => base_dir().join(APP_DIR),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn base_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("data");
        let resolved = data_dir(Some(&target)).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }
}
