// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter engine — deterministic tone transforms for corrected pages, plus a
// bounded content-addressed cache of their results.

use std::collections::{HashMap, VecDeque};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use scanwerk_core::FilterId;
use scanwerk_core::error::ScanwerkError;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::image::processor::ImageProcessor;

/// Neighbourhood radius for adaptive binarization.
const BLOCK_RADIUS: u32 = 15;
/// Offset subtracted from the local mean before thresholding.
const THRESHOLD_OFFSET: i32 = 10;
const CONTRAST_FACTOR: f32 = 1.5;
const BRIGHT_FACTOR: f32 = 1.3;

/// Apply `filter` to encoded image bytes.
///
/// `original` returns the input bytes as-is; every other filter returns PNG.
/// The result depends only on the input bytes and the filter.
#[instrument(skip(data), fields(data_len = data.len(), %filter))]
pub fn apply_filter(data: &[u8], filter: FilterId) -> Result<Vec<u8>, ScanwerkError> {
    if filter == FilterId::Original {
        return Ok(data.to_vec());
    }

    let image = ImageProcessor::from_bytes(data)?.into_dynamic();
    let filtered = match filter {
        FilterId::Original => image,
        FilterId::Grayscale => DynamicImage::ImageLuma8(luma_bt601(&image)),
        FilterId::Blackwhite => DynamicImage::ImageLuma8(binarize(&luma_bt601(&image))),
        FilterId::Contrast => map_tone(&image, |v| CONTRAST_FACTOR * (v - 128.0) + 128.0),
        FilterId::Bright => map_tone(&image, |v| BRIGHT_FACTOR * v),
    };

    let out = ImageProcessor::from_dynamic(filtered).to_png_bytes()?;
    debug!(out_bytes = out.len(), "Filter applied");
    Ok(out)
}

/// Parse `filter_id` and apply it. Unknown ids fail before any work is done.
pub fn apply_filter_str(data: &[u8], filter_id: &str) -> Result<Vec<u8>, ScanwerkError> {
    let filter: FilterId = filter_id.parse()?;
    apply_filter(data, filter)
}

/// ITU-R BT.601 luma: `Y = 0.299 R + 0.587 G + 0.114 B`, rounded.
fn luma_bt601(image: &DynamicImage) -> GrayImage {
    if !image.color().has_color() {
        return image.to_luma8();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        let y = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([y.min(255) as u8])
    })
}

/// Per-channel tone curve, clamped to `[0, 255]`. Luma images stay luma.
fn map_tone(image: &DynamicImage, curve: impl Fn(f32) -> f32) -> DynamicImage {
    let apply = |c: u8| curve(c as f32).round().clamp(0.0, 255.0) as u8;
    if !image.color().has_color() {
        let gray = image.to_luma8();
        let out = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([apply(gray.get_pixel(x, y).0[0])])
        });
        return DynamicImage::ImageLuma8(out);
    }
    let rgb = image.to_rgb8();
    let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        Rgb([apply(r), apply(g), apply(b)])
    });
    DynamicImage::ImageRgb8(out)
}

// -- Adaptive binarization ----------------------------------------------------

/// Local-mean thresholding: a pixel turns black when it is darker than the
/// mean of its neighbourhood minus [`THRESHOLD_OFFSET`].
fn binarize(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let integral = compute_integral_image(gray);

    GrayImage::from_fn(width, height, |x, y| {
        let local_mean = region_mean(&integral, width, height, x, y, BLOCK_RADIUS);
        let threshold = (local_mean.round() as i32 - THRESHOLD_OFFSET).clamp(0, 255);
        let value = gray.get_pixel(x, y).0[0] as i32;
        Luma([if value < threshold { 0u8 } else { 255u8 }])
    })
}

/// Summed-area table with a zero row and column; `(width+1) x (height+1)`.
fn compute_integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    table
}

fn region_mean(
    integral: &[u64],
    img_width: u32,
    img_height: u32,
    cx: u32,
    cy: u32,
    radius: u32,
) -> f64 {
    let stride = (img_width + 1) as usize;

    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(img_width as usize);
    let y2 = ((cy + radius + 1) as usize).min(img_height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }

    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;

    sum / area
}

// -- Cache --------------------------------------------------------------------

/// Cache key: SHA-256 of the input bytes plus the filter applied to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKey {
    digest: String,
    filter: FilterId,
}

impl FilterKey {
    pub fn new(data: &[u8], filter: FilterId) -> Self {
        Self {
            digest: hex::encode(Sha256::digest(data)),
            filter,
        }
    }

    pub fn filter(&self) -> FilterId {
        self.filter
    }
}

/// Bounded cache of filter results keyed by `(sha256(input), filter)`.
///
/// Oldest entries are evicted first once `capacity` is reached. Callers
/// sharing one cache between threads should `lookup`, release the lock,
/// filter, then `insert`, so that no filter runs under the lock.
#[derive(Debug)]
pub struct FilterCache {
    capacity: usize,
    entries: HashMap<FilterKey, Vec<u8>>,
    order: VecDeque<FilterKey>,
    hits: u64,
    misses: u64,
}

impl FilterCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached result for `key`, counted as a hit or a miss.
    pub fn lookup(&mut self, key: &FilterKey) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(hit) => {
                self.hits += 1;
                Some(hit.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result. A key that is already present keeps its slot, so two
    /// threads filling the same miss leave one entry.
    pub fn insert(&mut self, key: FilterKey, out: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = out;
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        debug!(filter = %key.filter, entries = self.entries.len() + 1, "filter result cached");
        self.order.push_back(key.clone());
        self.entries.insert(key, out);
    }

    /// Return the cached result for `(data, filter)`, computing it on a miss.
    pub fn get_or_apply(&mut self, data: &[u8], filter: FilterId) -> Result<Vec<u8>, ScanwerkError> {
        if filter == FilterId::Original {
            return Ok(data.to_vec());
        }

        let key = FilterKey::new(data, filter);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let out = apply_filter(data, filter)?;
        self.insert(key, out.clone());
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(image: DynamicImage) -> Vec<u8> {
        ImageProcessor::from_dynamic(image).to_png_bytes().unwrap()
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        ImageProcessor::from_bytes(bytes).unwrap().into_dynamic()
    }

    fn gradient() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 100]));
        png(DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn original_is_identity() {
        let bytes = gradient();
        assert_eq!(apply_filter(&bytes, FilterId::Original).unwrap(), bytes);
    }

    #[test]
    fn every_filter_is_deterministic() {
        let bytes = gradient();
        for filter in FilterId::ALL {
            let a = apply_filter(&bytes, filter).unwrap();
            let b = apply_filter(&bytes, filter).unwrap();
            assert_eq!(a, b, "{filter} is not deterministic");
        }
    }

    #[test]
    fn grayscale_uses_bt601_weights() {
        let img = RgbImage::from_pixel(2, 2, Rgb([200, 100, 50]));
        let out = apply_filter(&png(DynamicImage::ImageRgb8(img)), FilterId::Grayscale).unwrap();
        let gray = decode(&out).to_luma8();
        // 0.299*200 + 0.587*100 + 0.114*50 = 124.2
        assert_eq!(gray.get_pixel(0, 0).0[0], 124);
    }

    #[test]
    fn blackwhite_on_uniform_mid_gray_is_binary() {
        let img = GrayImage::from_pixel(40, 40, Luma([128]));
        let out = apply_filter(&png(DynamicImage::ImageLuma8(img)), FilterId::Blackwhite).unwrap();
        let gray = decode(&out).to_luma8();
        assert!(gray.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn blackwhite_output_is_always_binary() {
        let out = apply_filter(&gradient(), FilterId::Blackwhite).unwrap();
        let gray = decode(&out).to_luma8();
        assert!(gray.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn contrast_and_bright_curves() {
        let img = RgbImage::from_pixel(1, 1, Rgb([100, 200, 128]));
        let bytes = png(DynamicImage::ImageRgb8(img));

        let contrast = decode(&apply_filter(&bytes, FilterId::Contrast).unwrap()).to_rgb8();
        // 1.5*(100-128)+128 = 86; 1.5*(200-128)+128 = 236
        assert_eq!(contrast.get_pixel(0, 0), &Rgb([86, 236, 128]));

        let bright = decode(&apply_filter(&bytes, FilterId::Bright).unwrap()).to_rgb8();
        // 130, 260 -> 255, 166.4 -> 166
        assert_eq!(bright.get_pixel(0, 0), &Rgb([130, 255, 166]));
    }

    #[test]
    fn unknown_filter_id_is_rejected() {
        let err = apply_filter_str(&gradient(), "vintage").unwrap_err();
        assert!(matches!(err, ScanwerkError::InvalidArgument(_)));
        assert!(apply_filter_str(&gradient(), "contrast").is_ok());
    }

    #[test]
    fn cache_hits_and_evicts_oldest() {
        let mut cache = FilterCache::new(2);
        let bytes = gradient();

        let first = cache.get_or_apply(&bytes, FilterId::Grayscale).unwrap();
        let again = cache.get_or_apply(&bytes, FilterId::Grayscale).unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.stats(), (1, 1));

        cache.get_or_apply(&bytes, FilterId::Contrast).unwrap();
        cache.get_or_apply(&bytes, FilterId::Bright).unwrap();
        assert_eq!(cache.len(), 2);

        // Grayscale was evicted first, so this is a miss.
        cache.get_or_apply(&bytes, FilterId::Grayscale).unwrap();
        assert_eq!(cache.stats(), (1, 4));
    }

    #[test]
    fn racing_inserts_for_one_key_keep_one_slot() {
        let mut cache = FilterCache::new(2);
        let bytes = gradient();
        let key = FilterKey::new(&bytes, FilterId::Grayscale);
        assert!(cache.lookup(&key).is_none());

        let out = apply_filter(&bytes, FilterId::Grayscale).unwrap();
        cache.insert(key.clone(), out.clone());
        cache.insert(key.clone(), out.clone());
        assert_eq!(cache.len(), 1);

        let bright = FilterKey::new(&bytes, FilterId::Bright);
        cache.insert(bright.clone(), Vec::new());
        assert_eq!(cache.lookup(&key), Some(out));

        // Grayscale is still the oldest single entry and goes first.
        cache.insert(FilterKey::new(&bytes, FilterId::Contrast), Vec::new());
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&key).is_none());
        assert!(cache.lookup(&bright).is_some());
        assert_eq!(cache.stats(), (2, 2));
    }
}
