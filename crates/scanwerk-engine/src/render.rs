// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page rendering: corrected image, then rotation, then filter.

use std::sync::Mutex;

use tracing::{debug, instrument};

use scanwerk_core::error::Result;
use scanwerk_core::types::Page;
use scanwerk_core::FilterId;
use scanwerk_document::{FilterCache, FilterKey, ImageProcessor, apply_filter};
use scanwerk_store::PageStore;

/// Longest edge of a document thumbnail, in pixels.
pub const THUMBNAIL_EDGE: u32 = 320;
const THUMBNAIL_QUALITY: u8 = 80;

/// Produce the final image bytes for one page.
///
/// Uses the corrected image when there is one, otherwise the raw capture.
#[instrument(skip_all, fields(page_id = %page.id, rotation = page.rotation_degrees, filter = %page.applied_filter))]
pub fn render_page(store: &PageStore, page: &Page, cache: &Mutex<FilterCache>) -> Result<Vec<u8>> {
    let image_ref = page
        .corrected_image_ref
        .as_ref()
        .unwrap_or(&page.source_image_ref);
    let mut bytes = store.read(image_ref)?;

    if page.rotation_degrees != 0 {
        bytes = ImageProcessor::from_bytes(&bytes)?
            .rotate_quarter_turns(page.rotation_degrees)?
            .to_png_bytes()?;
    }

    let out = filtered(&bytes, page.applied_filter, cache, apply_filter)?;
    debug!(bytes = out.len(), "page rendered");
    Ok(out)
}

/// Filter through the shared cache. The lock covers lookup and insert only,
/// so concurrent renders filter in parallel.
fn filtered(
    bytes: &[u8],
    filter: FilterId,
    cache: &Mutex<FilterCache>,
    apply: impl FnOnce(&[u8], FilterId) -> Result<Vec<u8>>,
) -> Result<Vec<u8>> {
    if filter == FilterId::Original {
        return Ok(bytes.to_vec());
    }
    let key = FilterKey::new(bytes, filter);
    let hit = cache.lock().expect("filter cache lock poisoned").lookup(&key);
    if let Some(out) = hit {
        return Ok(out);
    }
    let out = apply(bytes, filter)?;
    cache
        .lock()
        .expect("filter cache lock poisoned")
        .insert(key, out.clone());
    Ok(out)
}

/// Render every page in order.
pub fn render_pages(
    store: &PageStore,
    pages: &[Page],
    cache: &Mutex<FilterCache>,
) -> Result<Vec<Vec<u8>>> {
    pages
        .iter()
        .map(|page| render_page(store, page, cache))
        .collect()
}

/// JPEG thumbnail of a rendered page.
pub fn thumbnail(rendered: &[u8]) -> Result<Vec<u8>> {
    ImageProcessor::from_bytes(rendered)?
        .thumbnail(THUMBNAIL_EDGE)
        .to_jpeg_bytes(THUMBNAIL_QUALITY)
}
