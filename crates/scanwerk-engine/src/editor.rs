// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ordered page editing for one document.
//
// Every operation builds the new page list on a copy and swaps it in only
// once the whole edit has succeeded, so a rejected edit leaves the previous
// list untouched. After each successful edit the order indices are
// renumbered densely and the version counter is bumped.

use serde::Serialize;
use tracing::debug;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    CropQuad, FilterId, ImageRef, MAX_PAGES, NormalizedPoint, Page, PageId, normalize_rotation,
};

/// The page list as it stood after an edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSnapshot {
    pub version: u64,
    pub pages: Vec<Page>,
}

/// Owner of a document's ordered pages.
#[derive(Debug, Clone, Default)]
pub struct PageEditor {
    pages: Vec<Page>,
    version: u64,
    /// When set, deleting the only remaining page is refused.
    keep_last_page: bool,
}

impl PageEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume editing a stored page list. Indices are renumbered to match
    /// the list order.
    pub fn from_pages(mut pages: Vec<Page>, version: u64) -> Self {
        renumber(&mut pages);
        Self {
            pages,
            version,
            keep_last_page: false,
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page(&self, id: &PageId) -> Option<&Page> {
        self.pages.iter().find(|p| p.id == *id)
    }

    pub fn set_keep_last_page(&mut self, keep: bool) {
        self.keep_last_page = keep;
    }

    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            version: self.version,
            pages: self.pages.clone(),
        }
    }

    // -- Structure ------------------------------------------------------------

    /// Insert `page` at `at_index`, clamped to the end of the list.
    pub fn insert(&mut self, page: Page, at_index: usize) -> Result<PageSnapshot> {
        if self.pages.len() >= MAX_PAGES {
            return Err(ScanwerkError::InvalidArgument(format!(
                "a document holds at most {MAX_PAGES} pages"
            )));
        }
        if self.page(&page.id).is_some() {
            return Err(ScanwerkError::InvalidArgument(format!(
                "page {} is already in the document",
                page.id
            )));
        }
        let at = at_index.min(self.pages.len());
        let mut pages = self.pages.clone();
        pages.insert(at, page);
        Ok(self.commit(pages))
    }

    /// Append `page` after the last one.
    pub fn push(&mut self, page: Page) -> Result<PageSnapshot> {
        let end = self.pages.len();
        self.insert(page, end)
    }

    pub fn delete(&mut self, page_id: &PageId) -> Result<PageSnapshot> {
        let at = self.position(page_id)?;
        if self.keep_last_page && self.pages.len() == 1 {
            return Err(ScanwerkError::PrecludedOperation(
                "cannot delete the only page of a finalized document".into(),
            ));
        }
        let mut pages = self.pages.clone();
        pages.remove(at);
        Ok(self.commit(pages))
    }

    /// Move the page at `from` to `to`; pages in between shift by one.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<PageSnapshot> {
        let len = self.pages.len();
        if from >= len || to >= len {
            return Err(ScanwerkError::InvalidArgument(format!(
                "reorder {from} -> {to} is out of range for {len} pages"
            )));
        }
        if from == to {
            return Ok(self.snapshot());
        }
        let mut pages = self.pages.clone();
        let page = pages.remove(from);
        pages.insert(to, page);
        Ok(self.commit(pages))
    }

    // -- Per-page attributes --------------------------------------------------

    /// Rotate by `degrees` (any multiple of 90, negative turns left).
    pub fn rotate(&mut self, page_id: &PageId, degrees: i32) -> Result<PageSnapshot> {
        normalize_rotation(degrees)?;
        self.modify(page_id, |page| page.rotate_by(degrees))
    }

    /// Record the crop quad; `None` resets to the full frame.
    pub fn set_crop_quad(
        &mut self,
        page_id: &PageId,
        quad: Option<CropQuad>,
    ) -> Result<PageSnapshot> {
        self.modify(page_id, |page| {
            page.crop_quad = quad;
            Ok(())
        })
    }

    /// Validate raw corner points and record them as the crop quad.
    pub fn set_crop_points(
        &mut self,
        page_id: &PageId,
        points: [NormalizedPoint; 4],
    ) -> Result<PageSnapshot> {
        let quad = CropQuad::new(points)?;
        self.set_crop_quad(page_id, Some(quad))
    }

    pub fn set_filter(&mut self, page_id: &PageId, filter_id: &str) -> Result<PageSnapshot> {
        let filter: FilterId = filter_id.parse()?;
        self.modify(page_id, |page| {
            page.applied_filter = filter;
            Ok(())
        })
    }

    /// Apply one filter to every page.
    pub fn set_filter_all(&mut self, filter_id: &str) -> Result<PageSnapshot> {
        let filter: FilterId = filter_id.parse()?;
        let mut pages = self.pages.clone();
        for page in &mut pages {
            page.applied_filter = filter;
        }
        Ok(self.commit(pages))
    }

    pub fn set_corrected(&mut self, page_id: &PageId, image_ref: ImageRef) -> Result<PageSnapshot> {
        self.modify(page_id, |page| {
            page.corrected_image_ref = Some(image_ref);
            Ok(())
        })
    }

    // -- Internals ------------------------------------------------------------

    fn position(&self, page_id: &PageId) -> Result<usize> {
        self.pages
            .iter()
            .position(|p| p.id == *page_id)
            .ok_or_else(|| {
                ScanwerkError::InvalidArgument(format!("page {page_id} is not in the document"))
            })
    }

    fn modify(
        &mut self,
        page_id: &PageId,
        change: impl FnOnce(&mut Page) -> Result<()>,
    ) -> Result<PageSnapshot> {
        let at = self.position(page_id)?;
        let mut pages = self.pages.clone();
        change(&mut pages[at])?;
        Ok(self.commit(pages))
    }

    fn commit(&mut self, mut pages: Vec<Page>) -> PageSnapshot {
        renumber(&mut pages);
        self.pages = pages;
        self.version += 1;
        debug!(version = self.version, pages = self.pages.len(), "pages edited");
        self.snapshot()
    }
}

fn renumber(pages: &mut [Page]) {
    for (i, page) in pages.iter_mut().enumerate() {
        page.order_index = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page() -> Page {
        let id = PageId::new();
        Page::new(id, ImageRef(format!("pages/{id}/raw")), Utc::now())
    }

    fn editor_with(n: usize) -> (PageEditor, Vec<PageId>) {
        let mut editor = PageEditor::new();
        let mut ids = Vec::new();
        for _ in 0..n {
            let p = page();
            ids.push(p.id);
            editor.push(p).unwrap();
        }
        (editor, ids)
    }

    fn ids(editor: &PageEditor) -> Vec<PageId> {
        editor.pages().iter().map(|p| p.id).collect()
    }

    fn assert_dense(editor: &PageEditor) {
        for (i, p) in editor.pages().iter().enumerate() {
            assert_eq!(p.order_index, i);
        }
    }

    #[test]
    fn reorder_first_to_last() {
        let (mut editor, ids_in) = editor_with(3);
        let (a, b, c) = (ids_in[0], ids_in[1], ids_in[2]);
        editor.reorder(0, 2).unwrap();
        assert_eq!(ids(&editor), vec![b, c, a]);
        assert_dense(&editor);
    }

    #[test]
    fn reorder_same_index_keeps_version() {
        let (mut editor, _) = editor_with(3);
        let before = editor.version();
        let snap = editor.reorder(1, 1).unwrap();
        assert_eq!(snap.version, before);
        assert!(editor.reorder(0, 3).is_err());
        assert_eq!(editor.version(), before);
    }

    #[test]
    fn order_stays_dense_through_mixed_edits() {
        let (mut editor, ids_in) = editor_with(6);
        editor.delete(&ids_in[2]).unwrap();
        assert_dense(&editor);
        editor.insert(page(), 0).unwrap();
        assert_dense(&editor);
        editor.reorder(5, 1).unwrap();
        assert_dense(&editor);
        editor.insert(page(), 999).unwrap();
        assert_dense(&editor);
        editor.delete(&ids_in[0]).unwrap();
        assert_dense(&editor);
        assert_eq!(editor.len(), 6);
    }

    #[test]
    fn every_edit_bumps_version() {
        let (mut editor, ids_in) = editor_with(2);
        assert_eq!(editor.version(), 2);
        editor.rotate(&ids_in[0], 90).unwrap();
        editor.set_filter(&ids_in[0], "grayscale").unwrap();
        editor.set_filter_all("contrast").unwrap();
        assert_eq!(editor.version(), 5);
    }

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let (mut editor, _) = editor_with(1);
        let dup = editor.pages()[0].clone();
        assert!(matches!(
            editor.insert(dup, 0),
            Err(ScanwerkError::InvalidArgument(_))
        ));

        let (mut full, _) = editor_with(MAX_PAGES);
        let version = full.version();
        assert!(matches!(
            full.push(page()),
            Err(ScanwerkError::InvalidArgument(_))
        ));
        assert_eq!(full.len(), MAX_PAGES);
        assert_eq!(full.version(), version);
    }

    #[test]
    fn rotation_wraps_and_rejects_odd_angles() {
        let (mut editor, ids_in) = editor_with(1);
        let id = ids_in[0];
        editor.rotate(&id, 90).unwrap();
        editor.rotate(&id, 270).unwrap();
        assert_eq!(editor.page(&id).unwrap().rotation_degrees, 0);
        editor.rotate(&id, -90).unwrap();
        assert_eq!(editor.page(&id).unwrap().rotation_degrees, 270);
        assert!(editor.rotate(&id, 45).is_err());
        assert_eq!(editor.page(&id).unwrap().rotation_degrees, 270);
    }

    #[test]
    fn tiny_crop_quad_leaves_previous_quad() {
        let (mut editor, ids_in) = editor_with(1);
        let id = ids_in[0];
        let good = [
            NormalizedPoint { x: 0.1, y: 0.1 },
            NormalizedPoint { x: 0.9, y: 0.1 },
            NormalizedPoint { x: 0.9, y: 0.9 },
            NormalizedPoint { x: 0.1, y: 0.9 },
        ];
        editor.set_crop_points(&id, good).unwrap();
        let version = editor.version();

        // 0.1 x 0.1 covers 1% of the frame.
        let tiny = [
            NormalizedPoint { x: 0.4, y: 0.4 },
            NormalizedPoint { x: 0.5, y: 0.4 },
            NormalizedPoint { x: 0.5, y: 0.5 },
            NormalizedPoint { x: 0.4, y: 0.5 },
        ];
        assert!(matches!(
            editor.set_crop_points(&id, tiny),
            Err(ScanwerkError::InvalidArgument(_))
        ));
        assert_eq!(editor.page(&id).unwrap().crop_quad.unwrap().points(), good);
        assert_eq!(editor.version(), version);
    }

    #[test]
    fn unknown_filter_is_rejected() {
        let (mut editor, ids_in) = editor_with(1);
        assert!(editor.set_filter(&ids_in[0], "sepia").is_err());
        assert!(editor.set_filter_all("sepia").is_err());
        assert_eq!(editor.pages()[0].applied_filter, FilterId::Original);
    }

    #[test]
    fn unknown_page_is_rejected() {
        let (mut editor, _) = editor_with(2);
        assert!(editor.delete(&PageId::new()).is_err());
        assert!(editor.rotate(&PageId::new(), 90).is_err());
        assert_eq!(editor.len(), 2);
    }

    #[test]
    fn last_page_guard() {
        let (mut editor, ids_in) = editor_with(1);
        editor.set_keep_last_page(true);
        assert!(matches!(
            editor.delete(&ids_in[0]),
            Err(ScanwerkError::PrecludedOperation(_))
        ));
        editor.set_keep_last_page(false);
        editor.delete(&ids_in[0]).unwrap();
        assert!(editor.is_empty());
    }

    #[test]
    fn from_pages_renumbers() {
        let mut pages = vec![page(), page()];
        pages[0].order_index = 7;
        pages[1].order_index = 3;
        let editor = PageEditor::from_pages(pages, 4);
        assert_dense(&editor);
        assert_eq!(editor.version(), 4);
    }
}
