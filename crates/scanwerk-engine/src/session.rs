// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document lifecycle: Draft -> Validated -> Assembled -> Persisted.
//
// A `DocumentSession` pairs the document record with its page editor and
// drives the three lifecycle steps. Validation and assembly failures return
// the document to Draft; a persistence failure leaves it Assembled so the
// caller can retry without re-assembling.
//
// Assembled files stay staged beside their destinations until the catalog
// accepts the record, so a failed re-assembly or persist never disturbs the
// files the catalog already points at.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, instrument, warn};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Document, DocumentId, DocumentState, MAX_PAGES};
use scanwerk_document::{AssembledFile, CancelFlag, DocumentAssembler, FilterCache};
use scanwerk_store::{DocumentCatalog, DocumentPatch, PageStore};

use crate::editor::{PageEditor, PageSnapshot};
use crate::output::{StagedFile, StagedOutput};
use crate::render;

/// Destination for persisted document records.
pub trait DocumentSink {
    /// Insert `document`, or overwrite the stored record with the same id.
    fn upsert(&mut self, document: &Document) -> Result<()>;
}

impl DocumentSink for DocumentCatalog {
    fn upsert(&mut self, document: &Document) -> Result<()> {
        if self.get(&document.id)?.is_some() {
            self.update(&document.id, DocumentPatch::from_document(document))?;
        } else {
            self.create(document)?;
        }
        Ok(())
    }
}

/// Output fields of a record as they were before an assembly.
#[derive(Debug, Clone)]
struct OutputFields {
    assembled_path: Option<PathBuf>,
    size_bytes: u64,
    thumbnail_ref: Option<PathBuf>,
}

impl OutputFields {
    fn of(document: &Document) -> Self {
        Self {
            assembled_path: document.assembled_path.clone(),
            size_bytes: document.size_bytes,
            thumbnail_ref: document.thumbnail_ref.clone(),
        }
    }

    fn restore(self, document: &mut Document) {
        document.assembled_path = self.assembled_path;
        document.size_bytes = self.size_bytes;
        document.thumbnail_ref = self.thumbnail_ref;
    }
}

/// Assembled files not yet handed to the catalog.
#[derive(Debug)]
struct PendingOutput {
    staged: StagedOutput,
    previous: OutputFields,
}

/// One document being edited or finalized.
#[derive(Debug)]
pub struct DocumentSession {
    /// Record fields other than the page list, which lives in `editor`.
    document: Document,
    editor: PageEditor,
    /// The catalog has held this document at some point.
    persisted_once: bool,
    pending: Option<PendingOutput>,
}

impl DocumentSession {
    /// Start an empty draft.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_document(Document::new_draft(name))
    }

    /// Resume a document, e.g. one loaded from the catalog.
    pub fn from_document(mut document: Document) -> Self {
        let pages = std::mem::take(&mut document.pages);
        let editor = PageEditor::from_pages(pages, document.version);
        let persisted_once = document.state == DocumentState::Persisted;
        Self {
            document,
            editor,
            persisted_once,
            pending: None,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.document.id
    }

    pub fn state(&self) -> DocumentState {
        self.document.state
    }

    pub fn editor(&self) -> &PageEditor {
        &self.editor
    }

    /// The full record, page list included.
    pub fn document(&self) -> Document {
        let mut document = self.document.clone();
        document.pages = self.editor.pages().to_vec();
        document.version = self.editor.version();
        document
    }

    pub fn rename(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ScanwerkError::InvalidArgument("document name is empty".into()));
        }
        self.document.name = name.trim().to_owned();
        Ok(())
    }

    /// Apply one page edit.
    ///
    /// A document past Draft goes back to Draft once the edit succeeds. The
    /// last page of a document that is finalized, or was persisted before,
    /// cannot be deleted.
    pub fn edit(
        &mut self,
        change: impl FnOnce(&mut PageEditor) -> Result<PageSnapshot>,
    ) -> Result<PageSnapshot> {
        let keep_last = self.document.state != DocumentState::Draft || self.persisted_once;
        self.editor.set_keep_last_page(keep_last);
        let before = self.editor.version();
        let snapshot = change(&mut self.editor)?;
        if snapshot.version != before && self.document.state != DocumentState::Draft {
            info!(
                document_id = %self.document.id,
                from = %self.document.state,
                "edit reopened document as draft"
            );
            self.rollback();
        }
        self.document.version = snapshot.version;
        Ok(snapshot)
    }

    /// Check the document is ready to assemble.
    ///
    /// Always starts over from Draft. Every problem found is reported in a
    /// single `Validation` error.
    #[instrument(skip_all, fields(document_id = %self.document.id, pages = self.editor.len()))]
    pub fn validate(&mut self, store: &PageStore) -> Result<()> {
        self.rollback();

        let mut violations = Vec::new();
        let count = self.editor.len();
        if count == 0 {
            violations.push("document has no pages".to_owned());
        } else if count > MAX_PAGES {
            violations.push(format!("document has {count} pages, at most {MAX_PAGES} allowed"));
        }
        for page in self.editor.pages() {
            match &page.corrected_image_ref {
                None => violations.push(format!(
                    "page {} has not been corrected",
                    page.order_index + 1
                )),
                Some(image_ref) if !store.contains(image_ref) => violations.push(format!(
                    "page {} corrected image {image_ref} is missing",
                    page.order_index + 1
                )),
                Some(_) => {}
            }
        }

        if !violations.is_empty() {
            warn!(count = violations.len(), "validation failed");
            return Err(ScanwerkError::validation(violations));
        }
        self.document.advance(DocumentState::Validated)?;
        info!("document validated");
        Ok(())
    }

    /// Render every page, then stage the PDF for `destination` and the
    /// thumbnail.
    ///
    /// The returned file describes the PDF as it will be at `destination`;
    /// it moves there when the document is persisted. On failure or
    /// cancellation nothing new is left on disk and the document is back in
    /// Draft.
    #[instrument(skip_all, fields(document_id = %self.document.id, path = %destination.display()))]
    pub fn assemble(
        &mut self,
        store: &PageStore,
        cache: &Mutex<FilterCache>,
        assembler: &DocumentAssembler,
        destination: &Path,
        cancel: &CancelFlag,
        progress: impl FnMut(usize, usize),
    ) -> Result<AssembledFile> {
        self.document.state.advance_to(DocumentState::Assembled)?;

        match self.build(store, cache, assembler, destination, cancel, progress) {
            Ok((file, staged)) => {
                self.document.advance(DocumentState::Assembled)?;
                let previous = OutputFields::of(&self.document);
                self.document.size_bytes = file.size_bytes;
                self.document.assembled_path = Some(file.path.clone());
                self.document.thumbnail_ref = Some(store.thumbnail_path(&self.document.id));
                self.pending = Some(PendingOutput { staged, previous });
                info!(size_bytes = file.size_bytes, "document assembled");
                Ok(file)
            }
            Err(e) => {
                warn!(error = %e, "assembly failed, document back to draft");
                self.rollback();
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        store: &PageStore,
        cache: &Mutex<FilterCache>,
        assembler: &DocumentAssembler,
        destination: &Path,
        cancel: &CancelFlag,
        progress: impl FnMut(usize, usize),
    ) -> Result<(AssembledFile, StagedOutput)> {
        let rendered = render::render_pages(store, self.editor.pages(), cache)?;
        let first = rendered
            .first()
            .ok_or_else(|| ScanwerkError::Assembly("document has no pages".into()))?;
        let thumbnail = render::thumbnail(first)?;

        let pdf = StagedFile::new(destination);
        let file = assembler.assemble_to_path(&rendered, pdf.staged_path(), cancel, progress)?;
        let thumb = StagedFile::write(&store.thumbnail_path(&self.document.id), &thumbnail)
            .map_err(|e| ScanwerkError::Assembly(format!("cannot write thumbnail: {e}")))?;

        let file = AssembledFile {
            path: pdf.target().to_owned(),
            ..file
        };
        Ok((file, StagedOutput::new(vec![pdf, thumb])))
    }

    /// Move the staged files into place and record the document in `sink`.
    ///
    /// Only after the sink accepts the record does the document become
    /// Persisted and the files it replaces get deleted. On failure the
    /// previous files are restored and the document stays Assembled.
    #[instrument(skip_all, fields(document_id = %self.document.id))]
    pub fn persist(&mut self, sink: &mut impl DocumentSink) -> Result<Document> {
        self.document.state.advance_to(DocumentState::Persisted)?;

        let mut record = self.document();
        record.state = DocumentState::Persisted;

        if let Some(pending) = self.pending.as_mut() {
            pending.staged.commit().map_err(|e| {
                ScanwerkError::Persistence(format!("cannot move assembled files into place: {e}"))
            })?;
        }
        if let Err(e) = sink.upsert(&record) {
            if let Some(pending) = self.pending.as_mut() {
                pending.staged.revert();
            }
            return Err(match e {
                ScanwerkError::Persistence(_) => e,
                other => ScanwerkError::Persistence(other.to_string()),
            });
        }

        if let Some(pending) = self.pending.take() {
            pending.staged.settle();
            if let Some(old) = pending.previous.assembled_path {
                if record.assembled_path.as_ref() != Some(&old) {
                    remove_superseded(&old);
                }
            }
        }
        self.document.advance(DocumentState::Persisted)?;
        self.persisted_once = true;
        info!("document persisted");
        Ok(record)
    }

    /// Abandon any in-progress lifecycle step, dropping staged files.
    pub fn rollback(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.previous.restore(&mut self.document);
        }
        self.document.rollback();
    }
}

/// Delete an assembled file that a persisted record no longer points at.
fn remove_superseded(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed superseded document file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove superseded document file"),
    }
}
