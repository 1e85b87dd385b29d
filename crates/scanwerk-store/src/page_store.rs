// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem page store.
//
// Layout under the store root:
//
//   pages/<page_id>/raw             captured bytes, as received
//   pages/<page_id>/corrected.png   geometry corrector output
//   documents/<name>-<id>.pdf       assembled documents
//   thumbnails/<document_id>.jpg    first-page thumbnails
//
// Every image file has a `.sha256` sidecar that is checked on read.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::{Document, DocumentId, ImageRef, Page, PageId};
use tracing::{debug, info, instrument, warn};

use crate::integrity::{Seal, check_seal, seal};

const PAGES_DIR: &str = "pages";
const DOCUMENTS_DIR: &str = "documents";
const THUMBNAILS_DIR: &str = "thumbnails";
const RAW_FILE: &str = "raw";
const CORRECTED_FILE: &str = "corrected.png";

/// Owner of all page image bytes.
#[derive(Debug, Clone)]
pub struct PageStore {
    root: PathBuf,
}

impl PageStore {
    /// Open (or create) a store rooted at `root`.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [PAGES_DIR, DOCUMENTS_DIR, THUMBNAILS_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        debug!("page store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default directory for assembled documents.
    pub fn documents_dir(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    // -- Capture boundary -----------------------------------------------------

    /// Accept a raw capture and assign it a page id.
    ///
    /// Bytes that do not decode as an image are rejected with `Capture` and
    /// nothing is written.
    #[instrument(skip(self, raw), fields(raw_len = raw.len()))]
    pub fn ingest(&self, raw: &[u8], captured_at: DateTime<Utc>) -> Result<Page> {
        if raw.is_empty() {
            return Err(ScanwerkError::Capture("capture is empty".into()));
        }
        image::load_from_memory(raw)
            .map_err(|e| ScanwerkError::Capture(format!("capture is not a decodable image: {e}")))?;

        let id = PageId::new();
        let image_ref = page_ref(&id, RAW_FILE);
        self.write_image(&image_ref, raw)?;

        info!(page_id = %id, "capture ingested");
        Ok(Page::new(id, image_ref, captured_at))
    }

    // -- Image access ---------------------------------------------------------

    /// Read the bytes behind `image_ref`, verifying their digest.
    pub fn read(&self, image_ref: &ImageRef) -> Result<Vec<u8>> {
        let path = self.resolve(image_ref)?;
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanwerkError::NotFound(format!("image {image_ref}"))
            } else {
                e.into()
            }
        })?;
        if check_seal(&path, &bytes)? == Seal::Missing {
            warn!(%image_ref, "image has no digest sidecar");
        }
        Ok(bytes)
    }

    /// Store the corrector output for `page_id`, replacing any earlier one.
    #[instrument(skip(self, bytes), fields(page_id = %page_id, len = bytes.len()))]
    pub fn write_corrected(&self, page_id: &PageId, bytes: &[u8]) -> Result<ImageRef> {
        let image_ref = page_ref(page_id, CORRECTED_FILE);
        self.write_image(&image_ref, bytes)?;
        Ok(image_ref)
    }

    /// Whether `image_ref` names an existing image.
    pub fn contains(&self, image_ref: &ImageRef) -> bool {
        self.resolve(image_ref).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove every image belonging to `page_id`. Missing pages are ignored.
    #[instrument(skip(self), fields(page_id = %page_id))]
    pub fn remove_page(&self, page_id: &PageId) -> Result<()> {
        let dir = self.root.join(PAGES_DIR).join(page_id.to_string());
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("page images removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path for `image_ref`. Refs that escape the store root are
    /// rejected.
    pub fn resolve(&self, image_ref: &ImageRef) -> Result<PathBuf> {
        let relative = Path::new(image_ref.as_str());
        let safe = !image_ref.as_str().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ScanwerkError::InvalidArgument(format!(
                "image ref {image_ref:?} is not a store-relative path"
            )));
        }
        Ok(self.root.join(relative))
    }

    // -- Documents and thumbnails --------------------------------------------

    /// File name used for a document's assembled PDF: the sanitized
    /// document name followed by the first block of its id.
    pub fn document_file_name(document: &Document) -> String {
        let mut stem: String = document
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') { c } else { '_' })
            .collect();
        stem = stem.trim().replace(' ', "_");
        if stem.is_empty() {
            stem = "Scan".into();
        }
        let id = document.id.to_string();
        let short = id.split('-').next().unwrap_or(&id);
        format!("{stem}-{short}.pdf")
    }

    /// Path of the thumbnail for `document_id`.
    pub fn thumbnail_path(&self, document_id: &DocumentId) -> PathBuf {
        self.thumbnails_dir().join(format!("{document_id}.jpg"))
    }

    // -- Internals ------------------------------------------------------------

    fn write_image(&self, image_ref: &ImageRef, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(image_ref)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&path, bytes)?;
        seal(&path, bytes)
    }
}

fn page_ref(page_id: &PageId, file: &str) -> ImageRef {
    ImageRef(format!("{PAGES_DIR}/{page_id}/{file}"))
}

/// Write through a sibling temporary file, sync, then rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = path.with_file_name(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
