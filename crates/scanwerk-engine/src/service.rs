// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: owns the page store, the catalog and one session
// per open document, and runs correction and assembly in the background.
//
// Each open document sits behind its own `tokio::sync::Mutex`. Edits,
// captures and assembly of that document all take the lock, so they apply
// in submission order while other documents proceed independently. An
// assembly keeps the lock until it has finished, which makes later edits
// queue behind it.
//
// The catalog (`rusqlite`, `Send` but not `Sync`) is shared behind one
// `std::sync::Mutex`; every catalog mutation is serialized through it.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use scanwerk_core::AppConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    CropQuad, Document, DocumentId, DocumentMetadata, Folder, FolderColor, FolderId, ImageRef,
    NormalizedPoint, PageId,
};
use scanwerk_document::{
    AssembledFile, AssemblyOptions, CancelFlag, DocumentAssembler, FilterCache,
    GeometryCorrector,
};
use scanwerk_store::{
    CatalogRecords, CatalogStats, DocumentCatalog, DocumentPatch, DocumentQuery, PageStore,
};

use crate::editor::{PageEditor, PageSnapshot};
use crate::session::DocumentSession;

/// File name of the catalog database inside the data directory.
pub const CATALOG_FILE: &str = "catalog.db";
const EVENT_CAPACITY: usize = 256;

/// Progress and completion notices from background work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceEvent {
    PageCaptured {
        document_id: DocumentId,
        page_id: PageId,
    },
    PageCorrected {
        document_id: DocumentId,
        page_id: PageId,
        /// False when the low-confidence fallback kept the capture as is.
        unwarped: bool,
        confidence: f32,
        /// A re-crop made during detection was kept.
        superseded: bool,
    },
    CorrectionFailed {
        document_id: DocumentId,
        page_id: PageId,
        error: String,
    },
    AssemblyProgress {
        document_id: DocumentId,
        done: usize,
        total: usize,
    },
    Assembled {
        document_id: DocumentId,
        /// Where the PDF lands once persisted.
        path: PathBuf,
        size_bytes: u64,
    },
    AssemblyFailed {
        document_id: DocumentId,
        error: String,
    },
    AssemblyCancelled {
        document_id: DocumentId,
    },
    Persisted {
        document_id: DocumentId,
    },
    PersistFailed {
        document_id: DocumentId,
        error: String,
    },
    DocumentDeleted {
        document_id: DocumentId,
    },
}

/// Result of correcting one captured page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionOutcome {
    pub page_id: PageId,
    /// Quad the page ended up with, or `None` for the low-confidence
    /// fallback.
    pub quad: Option<CropQuad>,
    pub confidence: f32,
    /// A crop chosen while detection ran was kept instead of the detected one.
    pub superseded: bool,
}

/// Background correction of one captured page.
#[derive(Debug)]
pub struct CorrectionHandle {
    page_id: PageId,
    join: JoinHandle<Result<CorrectionOutcome>>,
}

impl CorrectionHandle {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub async fn wait(self) -> Result<CorrectionOutcome> {
        self.join
            .await
            .map_err(|e| ScanwerkError::Image(format!("correction task failed: {e}")))?
    }
}

/// Overrides for a single assembly.
#[derive(Debug, Clone, Default)]
pub struct AssemblyRequest {
    /// Output path. Defaults to the previous output of this document, or a
    /// file named after it in the save location.
    pub destination: Option<PathBuf>,
    /// Page layout. Defaults to the configured paper, orientation, margin
    /// and quality.
    pub options: Option<AssemblyOptions>,
    pub cancel: CancelFlag,
}

/// Background assembly (and persistence) of one document.
#[derive(Debug)]
pub struct AssemblyHandle {
    document_id: DocumentId,
    cancel: CancelFlag,
    join: JoinHandle<Result<Document>>,
}

impl AssemblyHandle {
    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Ask the assembler to stop. Takes effect between pages and before the
    /// output file is moved into place.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the persisted document.
    pub async fn wait(self) -> Result<Document> {
        self.join
            .await
            .map_err(|e| ScanwerkError::Assembly(format!("assembly task failed: {e}")))?
    }
}

type SessionRef = Arc<AsyncMutex<DocumentSession>>;

/// Shared scanner services. Cheap to clone.
#[derive(Clone)]
pub struct ScanService {
    data_dir: PathBuf,
    store: PageStore,
    catalog: Arc<Mutex<DocumentCatalog>>,
    sessions: Arc<Mutex<HashMap<DocumentId, SessionRef>>>,
    filter_cache: Arc<Mutex<FilterCache>>,
    config: Arc<Mutex<AppConfig>>,
    events: broadcast::Sender<ServiceEvent>,
}

impl ScanService {
    /// Open every subsystem under `data_dir`.
    #[instrument(skip_all, fields(path = %data_dir.as_ref().display()))]
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let config = AppConfig::load(&dir)?;
        let store = PageStore::open(&dir)?;
        let catalog = DocumentCatalog::open(dir.join(CATALOG_FILE))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!("scan service initialised");
        Ok(Self {
            data_dir: dir,
            store,
            catalog: Arc::new(Mutex::new(catalog)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            filter_cache: Arc::new(Mutex::new(FilterCache::new(config.filter_cache_capacity))),
            config: Arc::new(Mutex::new(config)),
            events,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    // -- Configuration --------------------------------------------------------

    pub fn config(&self) -> AppConfig {
        self.config.lock().expect("config lock poisoned").clone()
    }

    /// Persist `config` and apply it to subsequent work.
    pub fn save_config(&self, config: AppConfig) -> Result<()> {
        config.save(&self.data_dir)?;
        let mut current = self.config.lock().expect("config lock poisoned");
        if current.filter_cache_capacity != config.filter_cache_capacity {
            *self.filter_cache.lock().expect("filter cache lock poisoned") =
                FilterCache::new(config.filter_cache_capacity);
        }
        *current = config;
        Ok(())
    }

    // -- Sessions -------------------------------------------------------------

    /// Open a new empty draft. Without a name the draft is called
    /// `Scan_YYYY_MM_DD`.
    pub fn start_document(&self, name: Option<&str>) -> DocumentId {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Document::default_name(Utc::now()));
        let session = DocumentSession::new(name);
        let id = session.id();
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(id, Arc::new(AsyncMutex::new(session)));
        info!(document_id = %id, "document started");
        id
    }

    /// Load a cataloged document for editing. Already-open documents are
    /// left as they are.
    pub fn open_document(&self, id: &DocumentId) -> Result<()> {
        if self.is_open(id) {
            return Ok(());
        }
        let document = self.catalog().require(id)?;
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .entry(*id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(DocumentSession::from_document(document))));
        debug!(document_id = %id, "document opened for editing");
        Ok(())
    }

    pub fn is_open(&self, id: &DocumentId) -> bool {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .contains_key(id)
    }

    /// Forget the editing session. Cataloged data is unaffected.
    pub fn close_document(&self, id: &DocumentId) -> bool {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(id)
            .is_some()
    }

    /// Current state of a document: the open session if any, otherwise the
    /// catalog record.
    pub async fn document(&self, id: &DocumentId) -> Result<Document> {
        match self.find_session(id) {
            Some(session) => Ok(session.lock().await.document()),
            None => self.catalog().require(id),
        }
    }

    // -- Capture and correction -----------------------------------------------

    /// Store a raw capture as the next page of `document_id` and start
    /// correcting it in the background.
    ///
    /// The page is in the document when this returns; its corrected image
    /// arrives when the returned handle completes.
    #[instrument(skip(self, raw), fields(document_id = %document_id, raw_len = raw.len()))]
    pub async fn capture(
        &self,
        document_id: &DocumentId,
        raw: Vec<u8>,
        captured_at: DateTime<Utc>,
    ) -> Result<CorrectionHandle> {
        let session = self.session(document_id)?;
        let mut guard = session.lock().await;

        let store = self.store.clone();
        let (mut page, raw) = tokio::task::spawn_blocking(move || {
            store.ingest(&raw, captured_at).map(|page| (page, raw))
        })
        .await
        .map_err(|e| ScanwerkError::Capture(format!("ingest task failed: {e}")))??;

        let config = self.config();
        page.applied_filter = config.default_filter;
        let page_id = page.id;
        if let Err(e) = guard.edit(|editor| editor.push(page)) {
            self.discard_page_images(&page_id);
            return Err(e);
        }
        drop(guard);

        self.emit(ServiceEvent::PageCaptured {
            document_id: *document_id,
            page_id,
        });

        let join = tokio::spawn(self.clone().correct_page(*document_id, page_id, raw, config));
        Ok(CorrectionHandle { page_id, join })
    }

    async fn correct_page(
        self,
        document_id: DocumentId,
        page_id: PageId,
        raw: Vec<u8>,
        config: AppConfig,
    ) -> Result<CorrectionOutcome> {
        let result = self.run_correction(document_id, page_id, raw, config).await;
        match &result {
            Ok(outcome) => self.emit(ServiceEvent::PageCorrected {
                document_id,
                page_id,
                unwarped: outcome.quad.is_some(),
                confidence: outcome.confidence,
                superseded: outcome.superseded,
            }),
            Err(e) => {
                error!(document_id = %document_id, page_id = %page_id, error = %e, "page correction failed");
                self.emit(ServiceEvent::CorrectionFailed {
                    document_id,
                    page_id,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_correction(
        &self,
        document_id: DocumentId,
        page_id: PageId,
        raw: Vec<u8>,
        config: AppConfig,
    ) -> Result<CorrectionOutcome> {
        let (detected, quad, confidence, raw) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<u8>, Option<CropQuad>, f32, Vec<u8>)> {
                if !config.auto_edge_detection {
                    return Ok((raw.clone(), None, 0.0, raw));
                }
                let correction = GeometryCorrector::new()
                    .with_min_confidence(config.geometry_min_confidence)
                    .correct(&raw)?;
                Ok((correction.image_bytes, correction.quad, correction.confidence, raw))
            },
        )
        .await
        .map_err(|e| ScanwerkError::Image(format!("correction task failed: {e}")))??;

        let session = match self.session(&document_id) {
            Ok(session) => session,
            Err(e) => {
                // The document was deleted or closed meanwhile.
                self.discard_page_images(&page_id);
                return Err(e);
            }
        };
        let mut guard = session.lock().await;

        // Nothing is written until the lock is held, so a re-crop that landed
        // while detection ran cannot be overwritten.
        let Some(page) = guard.editor().page(&page_id) else {
            debug!(page_id = %page_id, "dropping correction for removed page");
            self.discard_page_images(&page_id);
            return Err(ScanwerkError::InvalidArgument(format!(
                "page {page_id} is not in the document"
            )));
        };
        let (chosen, already_corrected) = (page.crop_quad, page.corrected_image_ref.is_some());

        if already_corrected {
            debug!(page_id = %page_id, "page was re-cropped during detection, keeping it");
            return Ok(CorrectionOutcome {
                page_id,
                quad: chosen,
                confidence,
                superseded: true,
            });
        }

        let store = self.store.clone();
        let image_ref = tokio::task::spawn_blocking(move || -> Result<ImageRef> {
            let bytes = match chosen {
                Some(quad) => GeometryCorrector::new().unwarp(&raw, &quad)?,
                None => detected,
            };
            store.write_corrected(&page_id, &bytes)
        })
        .await
        .map_err(|e| ScanwerkError::Image(format!("correction task failed: {e}")))??;

        let outcome = match chosen {
            Some(quad) => {
                guard.edit(|editor| editor.set_corrected(&page_id, image_ref))?;
                CorrectionOutcome {
                    page_id,
                    quad: Some(quad),
                    confidence,
                    superseded: true,
                }
            }
            None => {
                guard.edit(|editor| {
                    editor.set_crop_quad(&page_id, quad)?;
                    editor.set_corrected(&page_id, image_ref)
                })?;
                CorrectionOutcome {
                    page_id,
                    quad,
                    confidence,
                    superseded: false,
                }
            }
        };
        Ok(outcome)
    }

    /// Re-crop a page from its raw capture with an explicit quad.
    ///
    /// The quad is validated first; a rejected quad leaves the page as it was.
    #[instrument(skip(self, points), fields(document_id = %document_id, page_id = %page_id))]
    pub async fn recrop_page(
        &self,
        document_id: &DocumentId,
        page_id: &PageId,
        points: [NormalizedPoint; 4],
    ) -> Result<PageSnapshot> {
        let quad = CropQuad::new(points)?;
        let session = self.session(document_id)?;
        let mut guard = session.lock().await;

        let source = guard
            .editor()
            .page(page_id)
            .map(|p| p.source_image_ref.clone())
            .ok_or_else(|| {
                ScanwerkError::InvalidArgument(format!("page {page_id} is not in the document"))
            })?;

        let store = self.store.clone();
        let id = *page_id;
        let image_ref = tokio::task::spawn_blocking(move || {
            let raw = store.read(&source)?;
            let bytes = GeometryCorrector::new().unwarp(&raw, &quad)?;
            store.write_corrected(&id, &bytes)
        })
        .await
        .map_err(|e| ScanwerkError::Image(format!("re-crop task failed: {e}")))??;

        guard.edit(|editor| {
            editor.set_crop_quad(page_id, Some(quad))?;
            editor.set_corrected(page_id, image_ref)
        })
    }

    // -- Page edits -----------------------------------------------------------

    /// Apply an arbitrary page edit under the document lock.
    pub async fn edit_pages(
        &self,
        document_id: &DocumentId,
        change: impl FnOnce(&mut PageEditor) -> Result<PageSnapshot>,
    ) -> Result<PageSnapshot> {
        let session = self.session(document_id)?;
        let mut guard = session.lock().await;
        guard.edit(change)
    }

    /// Remove a page and its images.
    pub async fn delete_page(
        &self,
        document_id: &DocumentId,
        page_id: &PageId,
    ) -> Result<PageSnapshot> {
        let snapshot = self
            .edit_pages(document_id, |editor| editor.delete(page_id))
            .await?;
        self.discard_page_images(page_id);
        Ok(snapshot)
    }

    pub async fn reorder_pages(
        &self,
        document_id: &DocumentId,
        from: usize,
        to: usize,
    ) -> Result<PageSnapshot> {
        self.edit_pages(document_id, |editor| editor.reorder(from, to))
            .await
    }

    pub async fn rotate_page(
        &self,
        document_id: &DocumentId,
        page_id: &PageId,
        degrees: i32,
    ) -> Result<PageSnapshot> {
        self.edit_pages(document_id, |editor| editor.rotate(page_id, degrees))
            .await
    }

    pub async fn set_filter(
        &self,
        document_id: &DocumentId,
        page_id: &PageId,
        filter_id: &str,
    ) -> Result<PageSnapshot> {
        self.edit_pages(document_id, |editor| editor.set_filter(page_id, filter_id))
            .await
    }

    pub async fn set_filter_all(
        &self,
        document_id: &DocumentId,
        filter_id: &str,
    ) -> Result<PageSnapshot> {
        self.edit_pages(document_id, |editor| editor.set_filter_all(filter_id))
            .await
    }

    /// Rename an open and/or cataloged document.
    pub async fn rename_document(&self, id: &DocumentId, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScanwerkError::InvalidArgument("document name is empty".into()));
        }
        let open = match self.find_session(id) {
            Some(session) => {
                session.lock().await.rename(name)?;
                true
            }
            None => false,
        };
        let patch = DocumentPatch {
            name: Some(name.to_owned()),
            ..DocumentPatch::default()
        };
        match self.catalog().update(id, patch) {
            Ok(_) => Ok(()),
            Err(ScanwerkError::NotFound(_)) if open => Ok(()),
            Err(e) => Err(e),
        }
    }

    // -- Assembly -------------------------------------------------------------

    /// Validate, assemble and persist a document with configured settings.
    pub async fn assemble(&self, document_id: &DocumentId) -> Result<AssemblyHandle> {
        self.assemble_with(document_id, AssemblyRequest::default())
            .await
    }

    /// Validate, assemble and persist a document in the background.
    ///
    /// The document lock is taken before this returns and held until the
    /// task finishes, so the output reflects the pages as they are now.
    pub async fn assemble_with(
        &self,
        document_id: &DocumentId,
        request: AssemblyRequest,
    ) -> Result<AssemblyHandle> {
        let session = self.session(document_id)?;
        let guard = session.lock_owned().await;

        let document = guard.document();
        let config = self.config();
        let options = request
            .options
            .unwrap_or_else(|| configured_options(&config, &document));
        let destination = match (request.destination, document.assembled_path.clone()) {
            (Some(path), _) | (None, Some(path)) => path,
            (None, None) => config
                .save_location
                .clone()
                .unwrap_or_else(|| self.store.documents_dir())
                .join(PageStore::document_file_name(&document)),
        };

        let cancel = request.cancel;
        let worker = self.clone();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let task = tokio::task::spawn_blocking(move || {
                worker.run_assembly(guard, &destination, options, &task_cancel)
            });
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ScanwerkError::Assembly(format!("assembly task failed: {e}"))),
            }
        });

        Ok(AssemblyHandle {
            document_id: *document_id,
            cancel,
            join,
        })
    }

    fn run_assembly(
        &self,
        mut session: OwnedMutexGuard<DocumentSession>,
        destination: &Path,
        options: AssemblyOptions,
        cancel: &CancelFlag,
    ) -> Result<Document> {
        let document_id = session.id();

        let assembled = (|| -> Result<AssembledFile> {
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ScanwerkError::Assembly(format!("cannot create {}: {e}", parent.display())))?;
            }
            session.validate(&self.store)?;
            let assembler = DocumentAssembler::new(options);
            session.assemble(
                &self.store,
                &self.filter_cache,
                &assembler,
                destination,
                cancel,
                |done, total| {
                    self.emit(ServiceEvent::AssemblyProgress {
                        document_id,
                        done,
                        total,
                    })
                },
            )
        })();

        match assembled {
            Ok(file) => self.emit(ServiceEvent::Assembled {
                document_id,
                path: file.path,
                size_bytes: file.size_bytes,
            }),
            Err(ScanwerkError::Cancelled) => {
                info!(document_id = %document_id, "assembly cancelled");
                self.emit(ServiceEvent::AssemblyCancelled { document_id });
                return Err(ScanwerkError::Cancelled);
            }
            Err(e) => {
                error!(document_id = %document_id, error = %e, "assembly failed");
                self.emit(ServiceEvent::AssemblyFailed {
                    document_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        self.persist_locked(&mut session)
    }

    /// Retry persisting a document whose earlier persist failed.
    pub async fn persist(&self, document_id: &DocumentId) -> Result<Document> {
        let session = self.session(document_id)?;
        let mut guard = session.lock().await;
        self.persist_locked(&mut guard)
    }

    fn persist_locked(&self, session: &mut DocumentSession) -> Result<Document> {
        let document_id = session.id();
        let persisted = {
            let mut catalog = self.catalog();
            session.persist(&mut *catalog)
        };
        match persisted {
            Ok(document) => {
                self.emit(ServiceEvent::Persisted { document_id });
                Ok(document)
            }
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "persist failed, document stays assembled");
                self.emit(ServiceEvent::PersistFailed {
                    document_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    // -- Catalog --------------------------------------------------------------

    /// Cataloged documents matching `query`.
    pub fn documents(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        self.catalog().query(query)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.catalog().stats()
    }

    pub fn export_records(&self) -> Result<CatalogRecords> {
        self.catalog().export_records()
    }

    /// Delete a document everywhere: catalog record, assembled file,
    /// thumbnail, folder memberships, open session and page images.
    ///
    /// Waits for any in-flight work on the document first. A draft that was
    /// never cataloged is discarded the same way.
    #[instrument(skip(self), fields(document_id = %id))]
    pub async fn delete_document(&self, id: &DocumentId) -> Result<()> {
        let open = self.find_session(id);
        let mut guard = match &open {
            Some(session) => Some(session.lock().await),
            None => None,
        };

        let mut page_ids: BTreeSet<PageId> = BTreeSet::new();
        if let Some(session) = &guard {
            page_ids.extend(session.editor().pages().iter().map(|p| p.id));
        }

        let deleted = self.catalog().delete(id);
        match deleted {
            Ok(document) => {
                page_ids.extend(document.pages.iter().map(|p| p.id));
            }
            Err(ScanwerkError::NotFound(_)) if guard.is_some() => {
                debug!("discarding uncataloged draft");
            }
            Err(e) => return Err(e),
        }

        if let Some(session) = guard.as_mut() {
            // An uncataloged draft's only files are staged ones.
            session.rollback();
        }
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(id);
        drop(guard);

        for page_id in &page_ids {
            self.discard_page_images(page_id);
        }

        info!(pages = page_ids.len(), "document deleted");
        self.emit(ServiceEvent::DocumentDeleted { document_id: *id });
        Ok(())
    }

    // -- Folders --------------------------------------------------------------

    /// Create a folder. Without a colour the palette is cycled.
    pub fn create_folder(&self, name: &str, color: Option<FolderColor>) -> Result<Folder> {
        let mut catalog = self.catalog();
        let color = match color {
            Some(color) => color,
            None => FolderColor::cycle(catalog.list_folders()?.len()),
        };
        catalog.create_folder(name, color)
    }

    pub fn rename_folder(&self, id: &FolderId, name: &str) -> Result<()> {
        self.catalog().rename_folder(id, name)
    }

    pub fn recolor_folder(&self, id: &FolderId, color: FolderColor) -> Result<()> {
        self.catalog().recolor_folder(id, color)
    }

    pub fn delete_folder(&self, id: &FolderId) -> Result<()> {
        self.catalog().delete_folder(id)
    }

    pub fn folders(&self) -> Result<Vec<Folder>> {
        self.catalog().list_folders()
    }

    pub fn folder(&self, id: &FolderId) -> Result<Option<Folder>> {
        self.catalog().get_folder(id)
    }

    pub fn add_to_folder(&self, folder_id: &FolderId, document_id: &DocumentId) -> Result<bool> {
        self.catalog().add_document(folder_id, document_id)
    }

    pub fn remove_from_folder(
        &self,
        folder_id: &FolderId,
        document_id: &DocumentId,
    ) -> Result<bool> {
        self.catalog().remove_document(folder_id, document_id)
    }

    pub fn move_document(
        &self,
        document_id: &DocumentId,
        from: &FolderId,
        to: &FolderId,
    ) -> Result<()> {
        self.catalog().move_document(document_id, from, to)
    }

    pub fn folders_for_document(&self, document_id: &DocumentId) -> Result<Vec<FolderId>> {
        self.catalog().folders_for_document(document_id)
    }

    // -- Internals ------------------------------------------------------------

    fn catalog(&self) -> MutexGuard<'_, DocumentCatalog> {
        self.catalog.lock().expect("catalog lock poisoned")
    }

    fn find_session(&self, id: &DocumentId) -> Option<SessionRef> {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .get(id)
            .cloned()
    }

    fn session(&self, id: &DocumentId) -> Result<SessionRef> {
        self.find_session(id)
            .ok_or_else(|| ScanwerkError::NotFound(format!("document {id} is not open")))
    }

    fn discard_page_images(&self, page_id: &PageId) {
        if let Err(e) = self.store.remove_page(page_id) {
            warn!(page_id = %page_id, error = %e, "could not remove page images");
        }
    }

    fn emit(&self, event: ServiceEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Assembly settings from configuration, titled after the document.
pub fn configured_options(config: &AppConfig, document: &Document) -> AssemblyOptions {
    AssemblyOptions {
        paper_size: config.default_paper_size,
        orientation: config.default_orientation,
        margin_mm: config.page_margin_mm,
        quality: config.output_quality,
        metadata: DocumentMetadata {
            title: Some(document.name.clone()),
            ..DocumentMetadata::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};

    fn png() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([180u8])))
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn default_name_and_unknown_document() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScanService::open(dir.path()).unwrap();
        let id = service.start_document(None);
        let doc = service.document(&id).await.unwrap();
        assert!(doc.name.starts_with("Scan_"));

        let missing = DocumentId::new();
        assert!(matches!(
            service.capture(&missing, png(), Utc::now()).await,
            Err(ScanwerkError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn capture_applies_default_filter_and_corrects() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScanService::open(dir.path()).unwrap();
        let mut events = service.subscribe();
        let id = service.start_document(Some("Receipts"));

        let handle = service.capture(&id, png(), Utc::now()).await.unwrap();
        let page_id = handle.page_id();
        let outcome = handle.wait().await.unwrap();
        assert!(outcome.quad.is_none());

        let doc = service.document(&id).await.unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].applied_filter, service.config().default_filter);
        assert!(doc.pages[0].corrected_image_ref.is_some());

        assert_eq!(
            events.recv().await.unwrap(),
            ServiceEvent::PageCaptured { document_id: id, page_id }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            ServiceEvent::PageCorrected { unwarped: false, .. }
        ));
    }

    #[tokio::test]
    async fn undecodable_capture_adds_no_page() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScanService::open(dir.path()).unwrap();
        let id = service.start_document(None);
        let err = service
            .capture(&id, b"garbage".to_vec(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanwerkError::Capture(_)));
        assert!(service.document(&id).await.unwrap().pages.is_empty());
    }

    #[tokio::test]
    async fn config_round_trips_through_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScanService::open(dir.path()).unwrap();
        let mut config = service.config();
        config.auto_edge_detection = false;
        config.filter_cache_capacity = 4;
        service.save_config(config.clone()).unwrap();
        drop(service);

        let reopened = ScanService::open(dir.path()).unwrap();
        assert_eq!(reopened.config(), config);
    }

    #[tokio::test]
    async fn folder_colours_cycle_through_palette() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScanService::open(dir.path()).unwrap();
        let a = service.create_folder("A", None).unwrap();
        let b = service.create_folder("B", None).unwrap();
        let c = service.create_folder("C", Some(FolderColor::Violet)).unwrap();
        assert_eq!(a.color, FolderColor::PALETTE[0]);
        assert_eq!(b.color, FolderColor::PALETTE[1]);
        assert_eq!(c.color, FolderColor::Violet);
    }
}
