// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document catalog backed by SQLite.
//
// Stores every finalized document (with its ordered page list as JSON) and
// every user folder. Folder membership lives in its own table and each
// folder row caches its member count; both always change in the same
// transaction. A monotonically increasing `recency` column gives the
// newest-first listing order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    Document, DocumentId, DocumentState, Folder, FolderColor, FolderId, Page,
};

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        pages TEXT NOT NULL,
        created_at TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        assembled_path TEXT,
        thumbnail_ref TEXT,
        state TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 0,
        recency INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS folders (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        color TEXT NOT NULL,
        created_at TEXT NOT NULL,
        document_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS folder_documents (
        folder_id TEXT NOT NULL REFERENCES folders(id),
        document_id TEXT NOT NULL REFERENCES documents(id),
        PRIMARY KEY (folder_id, document_id)
    );
    CREATE INDEX IF NOT EXISTS idx_documents_recency ON documents(recency);
    CREATE INDEX IF NOT EXISTS idx_folder_documents_document ON folder_documents(document_id);
"#;

const DOCUMENT_COLUMNS: &str = "id, name, pages, created_at, size_bytes, assembled_path, \
                                thumbnail_ref, state, version";

/// Suffix given to artifacts while a delete is in flight.
const STAGING_SUFFIX: &str = ".deleting";

/// Ordering for document listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Newest first.
    #[default]
    Date,
    /// Alphabetical, case-insensitive.
    Name,
    /// Smallest first.
    Size,
}

impl std::str::FromStr for SortBy {
    type Err = ScanwerkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "date" => Ok(Self::Date),
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            other => Err(ScanwerkError::InvalidArgument(format!(
                "unknown sort key {other:?}"
            ))),
        }
    }
}

/// Search text plus ordering.
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub text: Option<String>,
    pub sort: Option<SortBy>,
}

/// Fields to merge into an existing document. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub name: Option<String>,
    pub pages: Option<Vec<Page>>,
    pub size_bytes: Option<u64>,
    pub assembled_path: Option<PathBuf>,
    pub thumbnail_ref: Option<PathBuf>,
    pub state: Option<DocumentState>,
    pub version: Option<u64>,
}

impl DocumentPatch {
    /// A patch that overwrites every mutable field with `document`'s values.
    pub fn from_document(document: &Document) -> Self {
        Self {
            name: Some(document.name.clone()),
            pages: Some(document.pages.clone()),
            size_bytes: Some(document.size_bytes),
            assembled_path: document.assembled_path.clone(),
            thumbnail_ref: document.thumbnail_ref.clone(),
            state: Some(document.state),
            version: Some(document.version),
        }
    }

    fn apply(self, document: &mut Document) {
        if let Some(name) = self.name {
            document.name = name;
        }
        if let Some(pages) = self.pages {
            document.pages = pages;
        }
        if let Some(size) = self.size_bytes {
            document.size_bytes = size;
        }
        if let Some(path) = self.assembled_path {
            document.assembled_path = Some(path);
        }
        if let Some(thumb) = self.thumbnail_ref {
            document.thumbnail_ref = Some(thumb);
        }
        if let Some(state) = self.state {
            document.state = state;
        }
        if let Some(version) = self.version {
            document.version = version;
        }
    }
}

/// Catalog summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub document_count: usize,
    pub total_bytes: u64,
}

/// Every persisted record, for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecords {
    pub documents: Vec<Document>,
    pub folders: Vec<Folder>,
}

/// Persistent catalog of documents and folders.
///
/// All methods are synchronous because `rusqlite` is; async callers wrap
/// them in `tokio::task::spawn_blocking`.
pub struct DocumentCatalog {
    conn: Connection,
}

impl DocumentCatalog {
    /// Open (or create) the catalog database at `path`, in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| db_err("open", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| db_err("WAL pragma", e))?;
        Self::init(conn)
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open in-memory", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| db_err("foreign_keys pragma", e))?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| db_err("create tables", e))?;
        info!("document catalog opened");
        Ok(Self { conn })
    }

    // -- Documents ------------------------------------------------------------

    /// Insert a document at the head of the recency order.
    #[instrument(skip(self, document), fields(document_id = %document.id))]
    pub fn create(&mut self, document: &Document) -> Result<()> {
        if self.exists(&document.id)? {
            return Err(ScanwerkError::Duplicate(format!("document {}", document.id)));
        }
        let recency = self.next_recency()?;
        let pages = serde_json::to_string(&document.pages)?;

        self.conn
            .execute(
                "INSERT INTO documents (id, name, pages, created_at, size_bytes, assembled_path,
                 thumbnail_ref, state, version, recency)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    document.id.to_string(),
                    document.name,
                    pages,
                    document.created_at.to_rfc3339(),
                    document.size_bytes as i64,
                    document.assembled_path.as_deref().map(path_text),
                    document.thumbnail_ref.as_deref().map(path_text),
                    document.state.as_str(),
                    document.version as i64,
                    recency,
                ],
            )
            .map_err(|e| db_err("insert document", e))?;

        info!(pages = document.pages.len(), "document cataloged");
        Ok(())
    }

    /// Fetch one document.
    pub fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id.to_string()],
                row_to_document,
            )
            .optional()
            .map_err(|e| db_err("get document", e))
    }

    /// Fetch one document or fail with `NotFound`.
    pub fn require(&self, id: &DocumentId) -> Result<Document> {
        self.get(id)?
            .ok_or_else(|| ScanwerkError::NotFound(format!("document {id}")))
    }

    /// All documents, most recently created first.
    pub fn list(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY recency DESC"
            ))
            .map_err(|e| db_err("prepare list", e))?;
        let docs = stmt
            .query_map([], row_to_document)
            .map_err(|e| db_err("query list", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("collect rows", e))?;
        Ok(docs)
    }

    /// Merge `patch` into the stored document and return the result.
    #[instrument(skip(self, patch), fields(document_id = %id))]
    pub fn update(&mut self, id: &DocumentId, patch: DocumentPatch) -> Result<Document> {
        let mut document = self.require(id)?;
        patch.apply(&mut document);
        let pages = serde_json::to_string(&document.pages)?;

        self.conn
            .execute(
                "UPDATE documents SET name = ?1, pages = ?2, size_bytes = ?3, assembled_path = ?4,
                 thumbnail_ref = ?5, state = ?6, version = ?7 WHERE id = ?8",
                params![
                    document.name,
                    pages,
                    document.size_bytes as i64,
                    document.assembled_path.as_deref().map(path_text),
                    document.thumbnail_ref.as_deref().map(path_text),
                    document.state.as_str(),
                    document.version as i64,
                    id.to_string(),
                ],
            )
            .map_err(|e| db_err("update document", e))?;

        debug!("document updated");
        Ok(document)
    }

    /// Remove a document, its memberships and its files.
    ///
    /// The assembled file and thumbnail are moved aside before the database
    /// transaction and unlinked only after it commits; if the transaction
    /// fails they are moved back.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn delete(&mut self, id: &DocumentId) -> Result<Document> {
        let document = self.require(id)?;

        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
        for path in [&document.assembled_path, &document.thumbnail_ref]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                continue;
            }
            let aside = staging_path(path);
            if let Err(e) = std::fs::rename(path, &aside) {
                restore(&staged);
                return Err(ScanwerkError::Persistence(format!(
                    "cannot stage {} for deletion: {e}",
                    path.display()
                )));
            }
            staged.push((path.clone(), aside));
        }

        let result = (|| -> Result<usize> {
            let tx = self.conn.transaction().map_err(|e| db_err("begin", e))?;
            let folders = member_folders(&tx, id)?;
            for folder in &folders {
                tx.execute(
                    "UPDATE folders SET document_count = document_count - 1 WHERE id = ?1",
                    params![folder],
                )
                .map_err(|e| db_err("decrement folder count", e))?;
            }
            tx.execute(
                "DELETE FROM folder_documents WHERE document_id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| db_err("delete memberships", e))?;
            tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])
                .map_err(|e| db_err("delete document", e))?;
            tx.commit().map_err(|e| db_err("commit", e))?;
            Ok(folders.len())
        })();

        match result {
            Ok(folder_count) => {
                for (_, aside) in &staged {
                    if let Err(e) = std::fs::remove_file(aside) {
                        warn!(path = %aside.display(), %e, "could not unlink deleted artifact");
                    }
                }
                info!(folders = folder_count, "document deleted");
                Ok(document)
            }
            Err(e) => {
                restore(&staged);
                Err(ScanwerkError::Persistence(e.to_string()))
            }
        }
    }

    /// Same as [`DocumentCatalog::delete`]; the confirmation prompt belongs
    /// to the caller.
    pub fn confirm_delete(&mut self, id: &DocumentId) -> Result<Document> {
        self.delete(id)
    }

    /// Documents whose name contains `text`, ignoring case. Empty text
    /// matches everything.
    pub fn search(&self, text: &str) -> Result<Vec<Document>> {
        let needle = text.trim().to_lowercase();
        let mut docs = self.list()?;
        if !needle.is_empty() {
            docs.retain(|d| d.name.to_lowercase().contains(&needle));
        }
        Ok(docs)
    }

    /// All documents in the given order.
    pub fn sort(&self, by: SortBy) -> Result<Vec<Document>> {
        let mut docs = self.list()?;
        sort_documents(&mut docs, by);
        Ok(docs)
    }

    /// Search, then sort. Without a sort key the recency order is kept.
    pub fn query(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let mut docs = self.search(query.text.as_deref().unwrap_or(""))?;
        if let Some(by) = query.sort {
            sort_documents(&mut docs, by);
        }
        Ok(docs)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let (count, total): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| db_err("stats", e))?;
        Ok(CatalogStats {
            document_count: count as usize,
            total_bytes: total as u64,
        })
    }

    /// Every document and folder, for backup or inspection.
    pub fn export_records(&self) -> Result<CatalogRecords> {
        Ok(CatalogRecords {
            documents: self.list()?,
            folders: self.list_folders()?,
        })
    }

    // -- Folders --------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn create_folder(&mut self, name: &str, color: FolderColor) -> Result<Folder> {
        let name = folder_name(name)?;
        let folder = Folder::new(name, color);
        self.conn
            .execute(
                "INSERT INTO folders (id, name, color, created_at, document_count)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![
                    folder.id.to_string(),
                    folder.name,
                    folder.color.name(),
                    folder.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err("insert folder", e))?;
        info!(folder_id = %folder.id, "folder created");
        Ok(folder)
    }

    pub fn rename_folder(&mut self, id: &FolderId, name: &str) -> Result<()> {
        let name = folder_name(name)?;
        let rows = self
            .conn
            .execute(
                "UPDATE folders SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )
            .map_err(|e| db_err("rename folder", e))?;
        if rows == 0 {
            return Err(ScanwerkError::NotFound(format!("folder {id}")));
        }
        Ok(())
    }

    pub fn recolor_folder(&mut self, id: &FolderId, color: FolderColor) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE folders SET color = ?1 WHERE id = ?2",
                params![color.name(), id.to_string()],
            )
            .map_err(|e| db_err("recolor folder", e))?;
        if rows == 0 {
            return Err(ScanwerkError::NotFound(format!("folder {id}")));
        }
        Ok(())
    }

    /// Delete a folder. Its documents are left in the catalog.
    #[instrument(skip(self), fields(folder_id = %id))]
    pub fn delete_folder(&mut self, id: &FolderId) -> Result<()> {
        let tx = self.conn.transaction().map_err(|e| db_err("begin", e))?;
        tx.execute(
            "DELETE FROM folder_documents WHERE folder_id = ?1",
            params![id.to_string()],
        )
        .map_err(|e| db_err("delete folder memberships", e))?;
        let rows = tx
            .execute("DELETE FROM folders WHERE id = ?1", params![id.to_string()])
            .map_err(|e| db_err("delete folder", e))?;
        if rows == 0 {
            return Err(ScanwerkError::NotFound(format!("folder {id}")));
        }
        tx.commit().map_err(|e| db_err("commit", e))?;
        info!("folder deleted");
        Ok(())
    }

    pub fn get_folder(&self, id: &FolderId) -> Result<Option<Folder>> {
        load_folder(&self.conn, id)
    }

    /// All folders, oldest first.
    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM folders ORDER BY created_at ASC, rowid ASC")
            .map_err(|e| db_err("prepare list folders", e))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("query list folders", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("collect rows", e))?;

        let mut folders = Vec::with_capacity(ids.len());
        for id in ids {
            let id = FolderId::parse(&id)?;
            if let Some(folder) = load_folder(&self.conn, &id)? {
                folders.push(folder);
            }
        }
        Ok(folders)
    }

    /// Folders that list `document_id`.
    pub fn folders_for_document(&self, document_id: &DocumentId) -> Result<Vec<FolderId>> {
        member_folders(&self.conn, document_id)?
            .iter()
            .map(|id| FolderId::parse(id))
            .collect()
    }

    /// Add a document to a folder. Returns `false` when it was already a
    /// member (nothing changes).
    #[instrument(skip(self), fields(folder_id = %folder_id, document_id = %document_id))]
    pub fn add_document(&mut self, folder_id: &FolderId, document_id: &DocumentId) -> Result<bool> {
        let tx = self.conn.transaction().map_err(|e| db_err("begin", e))?;
        let added = add_membership(&tx, folder_id, document_id)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(added)
    }

    /// Remove a document from a folder. Returns `false` when it was not a
    /// member (nothing changes).
    #[instrument(skip(self), fields(folder_id = %folder_id, document_id = %document_id))]
    pub fn remove_document(
        &mut self,
        folder_id: &FolderId,
        document_id: &DocumentId,
    ) -> Result<bool> {
        let tx = self.conn.transaction().map_err(|e| db_err("begin", e))?;
        let removed = remove_membership(&tx, folder_id, document_id)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(removed)
    }

    /// Move a document between folders in one transaction.
    #[instrument(skip(self))]
    pub fn move_document(
        &mut self,
        document_id: &DocumentId,
        from: &FolderId,
        to: &FolderId,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let tx = self.conn.transaction().map_err(|e| db_err("begin", e))?;
        if !remove_membership(&tx, from, document_id)? {
            return Err(ScanwerkError::InvalidArgument(format!(
                "document {document_id} is not in folder {from}"
            )));
        }
        add_membership(&tx, to, document_id)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(())
    }

    // -- Internals ------------------------------------------------------------

    fn exists(&self, id: &DocumentId) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| db_err("document lookup", e))
    }

    fn next_recency(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COALESCE(MAX(recency), 0) + 1 FROM documents", [], |row| {
                row.get(0)
            })
            .map_err(|e| db_err("recency", e))
    }
}

/// Order `documents` in place.
pub fn sort_documents(documents: &mut [Document], by: SortBy) {
    match by {
        SortBy::Date => documents.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortBy::Name => documents.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.name.cmp(&b.name))
        }),
        SortBy::Size => documents.sort_by_key(|d| d.size_bytes),
    }
}

// ---------------------------------------------------------------------------
// Membership helpers (run inside a transaction)
// ---------------------------------------------------------------------------

fn add_membership(tx: &Transaction<'_>, folder_id: &FolderId, document_id: &DocumentId) -> Result<bool> {
    require_folder(tx, folder_id)?;
    let doc_known: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM documents WHERE id = ?1",
            params![document_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err("document lookup", e))?;
    if doc_known.is_none() {
        return Err(ScanwerkError::NotFound(format!("document {document_id}")));
    }

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO folder_documents (folder_id, document_id) VALUES (?1, ?2)",
            params![folder_id.to_string(), document_id.to_string()],
        )
        .map_err(|e| db_err("insert membership", e))?;
    if inserted == 1 {
        tx.execute(
            "UPDATE folders SET document_count = document_count + 1 WHERE id = ?1",
            params![folder_id.to_string()],
        )
        .map_err(|e| db_err("increment folder count", e))?;
    }
    Ok(inserted == 1)
}

fn remove_membership(
    tx: &Transaction<'_>,
    folder_id: &FolderId,
    document_id: &DocumentId,
) -> Result<bool> {
    require_folder(tx, folder_id)?;
    let removed = tx
        .execute(
            "DELETE FROM folder_documents WHERE folder_id = ?1 AND document_id = ?2",
            params![folder_id.to_string(), document_id.to_string()],
        )
        .map_err(|e| db_err("delete membership", e))?;
    if removed == 1 {
        tx.execute(
            "UPDATE folders SET document_count = document_count - 1 WHERE id = ?1",
            params![folder_id.to_string()],
        )
        .map_err(|e| db_err("decrement folder count", e))?;
    }
    Ok(removed == 1)
}

fn require_folder(conn: &Connection, folder_id: &FolderId) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM folders WHERE id = ?1",
            params![folder_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| db_err("folder lookup", e))?;
    found
        .map(|_| ())
        .ok_or_else(|| ScanwerkError::NotFound(format!("folder {folder_id}")))
}

fn member_folders(conn: &Connection, document_id: &DocumentId) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT folder_id FROM folder_documents WHERE document_id = ?1")
        .map_err(|e| db_err("prepare member folders", e))?;
    let ids = stmt
        .query_map(params![document_id.to_string()], |row| row.get::<_, String>(0))
        .map_err(|e| db_err("query member folders", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_err("collect rows", e))?;
    Ok(ids)
}

fn load_folder(conn: &Connection, id: &FolderId) -> Result<Option<Folder>> {
    let row = conn
        .query_row(
            "SELECT name, color, created_at, document_count FROM folders WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err("get folder", e))?;
    let Some((name, color, created_at, count)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT document_id FROM folder_documents WHERE folder_id = ?1")
        .map_err(|e| db_err("prepare folder members", e))?;
    let members = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
        .map_err(|e| db_err("query folder members", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_err("collect rows", e))?;
    let document_ids = members
        .iter()
        .map(|m| DocumentId::parse(m))
        .collect::<Result<BTreeSet<_>>>()?;

    let folder = Folder::from_parts(
        *id,
        name,
        color.parse()?,
        document_ids,
        parse_timestamp(&created_at).map_err(|e| ScanwerkError::Database(e.to_string()))?,
        count.max(0) as usize,
    )?;
    Ok(Some(folder))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Column order must match [`DOCUMENT_COLUMNS`].
fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let pages_json: String = row.get(2)?;
    let created_at_str: String = row.get(3)?;
    let size_bytes: i64 = row.get(4)?;
    let assembled_path: Option<String> = row.get(5)?;
    let thumbnail_ref: Option<String> = row.get(6)?;
    let state_str: String = row.get(7)?;
    let version: i64 = row.get(8)?;

    let uuid = uuid::Uuid::parse_str(&id_str).map_err(|e| conversion(0, e))?;
    let pages: Vec<Page> = serde_json::from_str(&pages_json).map_err(|e| conversion(2, e))?;
    let created_at = parse_timestamp(&created_at_str).map_err(|e| conversion(3, e))?;
    let state: DocumentState = state_str.parse().map_err(|e| conversion(7, e))?;

    Ok(Document {
        id: DocumentId(uuid),
        name,
        pages,
        created_at,
        size_bytes: size_bytes.max(0) as u64,
        assembled_path: assembled_path.map(PathBuf::from),
        thumbnail_ref: thumbnail_ref.map(PathBuf::from),
        state,
        version: version.max(0) as u64,
    })
}

fn conversion<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn restore(staged: &[(PathBuf, PathBuf)]) {
    for (original, aside) in staged {
        if let Err(e) = std::fs::rename(aside, original) {
            warn!(path = %original.display(), %e, "could not restore staged artifact");
        }
    }
}

fn folder_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ScanwerkError::InvalidArgument("folder name is empty".into()));
    }
    Ok(trimmed.to_owned())
}

fn db_err(context: &str, err: rusqlite::Error) -> ScanwerkError {
    ScanwerkError::Database(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scanwerk_core::{ImageRef, PageId};

    fn doc(name: &str, size: u64, age_days: i64) -> Document {
        let mut d = Document::new_draft(name);
        d.size_bytes = size;
        d.created_at = Utc::now() - Duration::days(age_days);
        d.state = DocumentState::Persisted;
        d.pages = vec![Page::new(PageId::new(), ImageRef("pages/x/raw".into()), Utc::now())];
        d
    }

    fn catalog() -> DocumentCatalog {
        DocumentCatalog::open_in_memory().expect("open in-memory db")
    }

    #[test]
    fn create_get_and_list_by_recency() {
        let mut cat = catalog();
        let a = doc("Alpha", 10, 5);
        let b = doc("Beta", 20, 1);
        cat.create(&a).expect("create a");
        cat.create(&b).expect("create b");

        let fetched = cat.get(&a.id).unwrap().expect("found");
        assert_eq!(fetched, a);

        let names: Vec<_> = cat.list().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut cat = catalog();
        let a = doc("Alpha", 10, 0);
        cat.create(&a).unwrap();
        assert!(matches!(cat.create(&a), Err(ScanwerkError::Duplicate(_))));
        assert_eq!(cat.list().unwrap().len(), 1);
    }

    #[test]
    fn update_merges_named_fields() {
        let mut cat = catalog();
        let a = doc("Alpha", 10, 0);
        cat.create(&a).unwrap();

        let updated = cat
            .update(
                &a.id,
                DocumentPatch {
                    name: Some("Renamed".into()),
                    ..DocumentPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.size_bytes, 10);
        assert_eq!(cat.get(&a.id).unwrap().unwrap().name, "Renamed");

        let missing = cat.update(&DocumentId::new(), DocumentPatch::default());
        assert!(matches!(missing, Err(ScanwerkError::NotFound(_))));
    }

    #[test]
    fn search_ignores_case() {
        let mut cat = catalog();
        cat.create(&doc("Invoice March", 1, 0)).unwrap();
        cat.create(&doc("Receipt", 1, 0)).unwrap();
        cat.create(&doc("ÄRGER invoice", 1, 0)).unwrap();

        assert_eq!(cat.search("INVOICE").unwrap().len(), 2);
        assert_eq!(cat.search("ärger").unwrap().len(), 1);
        assert_eq!(cat.search("").unwrap().len(), 3);
        assert!(cat.search("zzz").unwrap().is_empty());
    }

    #[test]
    fn sort_orders() {
        let mut cat = catalog();
        cat.create(&doc("beta", 300, 2)).unwrap();
        cat.create(&doc("Alpha", 100, 0)).unwrap();
        cat.create(&doc("gamma", 200, 9)).unwrap();

        let names = |docs: Vec<Document>| docs.into_iter().map(|d| d.name).collect::<Vec<_>>();
        assert_eq!(names(cat.sort(SortBy::Date).unwrap()), ["Alpha", "beta", "gamma"]);
        assert_eq!(names(cat.sort(SortBy::Name).unwrap()), ["Alpha", "beta", "gamma"]);
        assert_eq!(names(cat.sort(SortBy::Size).unwrap()), ["Alpha", "gamma", "beta"]);

        let hits = cat
            .query(&DocumentQuery {
                text: Some("a".into()),
                sort: Some(SortBy::Size),
            })
            .unwrap();
        assert_eq!(names(hits), ["Alpha", "gamma", "beta"]);
    }

    #[test]
    fn membership_is_idempotent_and_counted() {
        let mut cat = catalog();
        let a = doc("Alpha", 1, 0);
        cat.create(&a).unwrap();
        let folder = cat.create_folder("Work", FolderColor::Blue).unwrap();

        assert!(cat.add_document(&folder.id, &a.id).unwrap());
        assert!(!cat.add_document(&folder.id, &a.id).unwrap());
        let stored = cat.get_folder(&folder.id).unwrap().unwrap();
        assert_eq!(stored.document_count(), 1);
        assert!(stored.contains(&a.id));

        assert!(cat.remove_document(&folder.id, &a.id).unwrap());
        assert!(!cat.remove_document(&folder.id, &a.id).unwrap());
        assert_eq!(cat.get_folder(&folder.id).unwrap().unwrap().document_count(), 0);
    }

    #[test]
    fn membership_requires_known_ids() {
        let mut cat = catalog();
        let folder = cat.create_folder("Work", FolderColor::Blue).unwrap();
        let err = cat.add_document(&folder.id, &DocumentId::new()).unwrap_err();
        assert!(matches!(err, ScanwerkError::NotFound(_)));
        assert_eq!(cat.get_folder(&folder.id).unwrap().unwrap().document_count(), 0);
    }

    #[test]
    fn move_between_folders() {
        let mut cat = catalog();
        let a = doc("Alpha", 1, 0);
        cat.create(&a).unwrap();
        let from = cat.create_folder("Inbox", FolderColor::Red).unwrap();
        let to = cat.create_folder("Archive", FolderColor::Green).unwrap();
        cat.add_document(&from.id, &a.id).unwrap();

        cat.move_document(&a.id, &from.id, &to.id).unwrap();
        assert_eq!(cat.get_folder(&from.id).unwrap().unwrap().document_count(), 0);
        assert_eq!(cat.get_folder(&to.id).unwrap().unwrap().document_count(), 1);

        // Not a member of `from` any more.
        assert!(cat.move_document(&a.id, &from.id, &to.id).is_err());
        assert_eq!(cat.get_folder(&to.id).unwrap().unwrap().document_count(), 1);
    }

    #[test]
    fn delete_removes_files_memberships_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("a.pdf");
        let thumb = dir.path().join("a.jpg");
        std::fs::write(&pdf, b"%PDF-1.5").unwrap();
        std::fs::write(&thumb, b"jpeg").unwrap();

        let mut cat = catalog();
        let mut a = doc("Alpha", 8, 0);
        a.assembled_path = Some(pdf.clone());
        a.thumbnail_ref = Some(thumb.clone());
        let b = doc("Beta", 1, 0);
        cat.create(&a).unwrap();
        cat.create(&b).unwrap();

        let f1 = cat.create_folder("One", FolderColor::Red).unwrap();
        let f2 = cat.create_folder("Two", FolderColor::Sky).unwrap();
        for f in [&f1, &f2] {
            cat.add_document(&f.id, &a.id).unwrap();
            cat.add_document(&f.id, &b.id).unwrap();
        }

        cat.delete(&a.id).unwrap();

        assert!(cat.get(&a.id).unwrap().is_none());
        assert!(!pdf.exists());
        assert!(!thumb.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        for f in [&f1, &f2] {
            let folder = cat.get_folder(&f.id).unwrap().unwrap();
            assert_eq!(folder.document_count(), 1);
            assert!(!folder.contains(&a.id));
        }
        assert!(matches!(
            cat.confirm_delete(&a.id),
            Err(ScanwerkError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_folder_keeps_documents() {
        let mut cat = catalog();
        let a = doc("Alpha", 1, 0);
        cat.create(&a).unwrap();
        let folder = cat.create_folder("Temp", FolderColor::Lime).unwrap();
        cat.add_document(&folder.id, &a.id).unwrap();

        cat.delete_folder(&folder.id).unwrap();
        assert!(cat.get_folder(&folder.id).unwrap().is_none());
        assert!(cat.get(&a.id).unwrap().is_some());
        assert!(cat.folders_for_document(&a.id).unwrap().is_empty());
        assert!(matches!(
            cat.delete_folder(&folder.id),
            Err(ScanwerkError::NotFound(_))
        ));
    }

    #[test]
    fn folder_rename_recolor_and_validation() {
        let mut cat = catalog();
        assert!(cat.create_folder("   ", FolderColor::Red).is_err());
        let folder = cat.create_folder("Old", FolderColor::Red).unwrap();
        cat.rename_folder(&folder.id, "New").unwrap();
        cat.recolor_folder(&folder.id, FolderColor::Violet).unwrap();
        let stored = cat.get_folder(&folder.id).unwrap().unwrap();
        assert_eq!(stored.name, "New");
        assert_eq!(stored.color, FolderColor::Violet);
        assert!(cat.rename_folder(&FolderId::new(), "x").is_err());
    }

    #[test]
    fn stats_and_export() {
        let mut cat = catalog();
        cat.create(&doc("Alpha", 1000, 0)).unwrap();
        cat.create(&doc("Beta", 24, 0)).unwrap();
        cat.create_folder("Work", FolderColor::Amber).unwrap();

        let stats = cat.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.total_bytes, 1024);

        let records = cat.export_records().unwrap();
        assert_eq!(records.documents.len(), 2);
        assert_eq!(records.folders.len(), 1);
        let json = serde_json::to_string(&records).unwrap();
        let back: CatalogRecords = serde_json::from_str(&json).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn reopening_file_database_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let a = doc("Alpha", 1, 0);
        {
            let mut cat = DocumentCatalog::open(&path).unwrap();
            cat.create(&a).unwrap();
        }
        let cat = DocumentCatalog::open(&path).unwrap();
        assert_eq!(cat.get(&a.id).unwrap().unwrap().name, "Alpha");
    }
}
