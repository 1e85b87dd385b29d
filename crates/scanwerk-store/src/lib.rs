// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-store — Persistence for Scanwerk.
//
// Provides content hashing for stored images, the filesystem page store that
// owns every captured and corrected page image, and the SQLite-backed
// document/folder catalog.

pub mod catalog;
pub mod integrity;
pub mod page_store;

pub use catalog::{
    CatalogRecords, CatalogStats, DocumentCatalog, DocumentPatch, DocumentQuery, SortBy,
};
pub use integrity::{Seal, fingerprint};
pub use page_store::PageStore;
