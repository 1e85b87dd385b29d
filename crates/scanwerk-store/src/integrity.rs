// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page image integrity — every stored image is sealed with a `.sha256`
// sidecar holding its SHA-256 digest, and checked against it on read.

use std::path::{Path, PathBuf};

use scanwerk_core::error::{Result, ScanwerkError};
use sha2::{Digest, Sha256};

use crate::page_store::write_atomic;

const SIDECAR_EXT: &str = "sha256";

/// Outcome of checking an image against its sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seal {
    Verified,
    /// No sidecar exists, e.g. an image written by hand.
    Missing,
}

/// Lowercase hex SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Sidecar path for the image at `path`: `<file>.sha256` in the same
/// directory.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXT);
    path.with_file_name(name)
}

/// Write the sidecar for `bytes`, which were just stored at `path`.
pub fn seal(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(&sidecar_path(path), fingerprint(bytes).as_bytes())
}

/// Compare `bytes`, read from `path`, with the stored digest.
pub fn check_seal(path: &Path, bytes: &[u8]) -> Result<Seal> {
    let recorded = match std::fs::read_to_string(sidecar_path(path)) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Seal::Missing),
        Err(e) => return Err(e.into()),
    };
    let recorded = recorded.trim();
    let actual = fingerprint(bytes);
    if !actual.eq_ignore_ascii_case(recorded) {
        return Err(ScanwerkError::IntegrityMismatch {
            expected: recorded.to_owned(),
            actual,
        });
    }
    Ok(Seal::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_of_empty_input() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sidecar_sits_next_to_image() {
        let path = Path::new("/store/pages/abc/corrected.png");
        assert_eq!(
            sidecar_path(path),
            Path::new("/store/pages/abc/corrected.png.sha256")
        );
    }

    #[test]
    fn sealed_bytes_verify_and_edits_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        seal(&path, b"page").unwrap();

        assert_eq!(check_seal(&path, b"page").unwrap(), Seal::Verified);
        match check_seal(&path, b"pagf").unwrap_err() {
            ScanwerkError::IntegrityMismatch { expected, actual } => {
                assert_eq!(expected, fingerprint(b"page"));
                assert_eq!(actual, fingerprint(b"pagf"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn hand_edited_sidecar_with_newline_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        std::fs::write(sidecar_path(&path), format!("{}\n", fingerprint(b"x"))).unwrap();
        assert_eq!(check_seal(&path, b"x").unwrap(), Seal::Verified);
    }

    #[test]
    fn unsealed_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            check_seal(&dir.path().join("raw"), b"x").unwrap(),
            Seal::Missing
        );
    }
}
