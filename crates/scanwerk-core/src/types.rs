// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk document scanner.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScanwerkError};

/// Maximum number of pages in a finalized document.
pub const MAX_PAGES: usize = 50;

/// Smallest area (as a fraction of the frame) a crop quad may enclose.
pub const MIN_QUAD_AREA_FRACTION: f64 = 0.05;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id from its hyphenated string form.
            pub fn parse(s: &str) -> Result<Self> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|e| {
                    ScanwerkError::InvalidArgument(format!(
                        "malformed {} {:?}: {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a captured page, assigned by the page store.
    PageId
);
uuid_id!(
    /// Unique identifier for a document (draft or finalized).
    DocumentId
);
uuid_id!(
    /// Unique identifier for a user-defined folder.
    FolderId
);

/// Opaque key addressing image bytes inside the page store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(pub String);

impl ImageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Crop quadrilateral
// ---------------------------------------------------------------------------

/// A point in normalized frame coordinates, `[0, 1]` on both axes, with the
/// origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Four-point polygon approximating a document's boundary, ordered
/// top-left, top-right, bottom-right, bottom-left.
///
/// A `CropQuad` can only be obtained through [`CropQuad::new`], so every
/// stored quad is in range, convex, and encloses at least
/// [`MIN_QUAD_AREA_FRACTION`] of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[NormalizedPoint; 4]", into = "[NormalizedPoint; 4]")]
pub struct CropQuad {
    points: [NormalizedPoint; 4],
}

impl CropQuad {
    /// Validate and build a quad.
    pub fn new(points: [NormalizedPoint; 4]) -> Result<Self> {
        const EPS: f64 = 1e-9;

        for (i, p) in points.iter().enumerate() {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(ScanwerkError::InvalidArgument(format!(
                    "crop quad corner {i} is not a finite coordinate"
                )));
            }
            if p.x < -EPS || p.x > 1.0 + EPS || p.y < -EPS || p.y > 1.0 + EPS {
                return Err(ScanwerkError::InvalidArgument(format!(
                    "crop quad corner {i} ({:.3}, {:.3}) lies outside the frame",
                    p.x, p.y
                )));
            }
        }

        // Every turn must have the same, non-zero orientation.
        let mut sign = 0.0f64;
        for i in 0..4 {
            let a = points[i];
            let b = points[(i + 1) % 4];
            let c = points[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross.abs() < EPS {
                return Err(ScanwerkError::InvalidArgument(
                    "crop quad is degenerate (collinear corners)".into(),
                ));
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return Err(ScanwerkError::InvalidArgument(
                    "crop quad is not convex or is self-intersecting".into(),
                ));
            }
        }

        let quad = Self { points };
        let area = quad.area();
        if area < MIN_QUAD_AREA_FRACTION {
            return Err(ScanwerkError::InvalidArgument(format!(
                "crop quad covers {:.1}% of the frame (minimum {:.0}%)",
                area * 100.0,
                MIN_QUAD_AREA_FRACTION * 100.0
            )));
        }
        Ok(quad)
    }

    /// The quad covering the whole frame.
    pub fn full_frame() -> Self {
        Self {
            points: [
                NormalizedPoint::new(0.0, 0.0),
                NormalizedPoint::new(1.0, 0.0),
                NormalizedPoint::new(1.0, 1.0),
                NormalizedPoint::new(0.0, 1.0),
            ],
        }
    }

    /// Build a quad from pixel corners of a `width` x `height` image.
    pub fn from_pixel_corners(corners: [(f32, f32); 4], width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ScanwerkError::InvalidArgument(
                "cannot normalize corners against an empty frame".into(),
            ));
        }
        let (w, h) = (width as f64, height as f64);
        let points = corners.map(|(x, y)| {
            NormalizedPoint::new((x as f64 / w).clamp(0.0, 1.0), (y as f64 / h).clamp(0.0, 1.0))
        });
        Self::new(points)
    }

    pub fn points(&self) -> [NormalizedPoint; 4] {
        self.points
    }

    /// Corners in pixel coordinates of a `width` x `height` image.
    pub fn to_pixel_corners(&self, width: u32, height: u32) -> [(f32, f32); 4] {
        self.points
            .map(|p| ((p.x * width as f64) as f32, (p.y * height as f64) as f32))
    }

    /// Enclosed area as a fraction of the frame (shoelace formula).
    pub fn area(&self) -> f64 {
        let mut twice = 0.0;
        for i in 0..4 {
            let a = self.points[i];
            let b = self.points[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        twice.abs() / 2.0
    }

    /// Whether this quad is the full frame (within `tolerance` per corner).
    pub fn is_full_frame(&self, tolerance: f64) -> bool {
        self.points
            .iter()
            .zip(Self::full_frame().points.iter())
            .all(|(a, b)| (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance)
    }
}

impl TryFrom<[NormalizedPoint; 4]> for CropQuad {
    type Error = ScanwerkError;

    fn try_from(points: [NormalizedPoint; 4]) -> Result<Self> {
        Self::new(points)
    }
}

impl From<CropQuad> for [NormalizedPoint; 4] {
    fn from(quad: CropQuad) -> Self {
        quad.points
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Deterministic tone transforms that can be applied to a corrected page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterId {
    #[default]
    Original,
    Grayscale,
    Blackwhite,
    Contrast,
    Bright,
}

impl FilterId {
    pub const ALL: [FilterId; 5] = [
        Self::Original,
        Self::Grayscale,
        Self::Blackwhite,
        Self::Contrast,
        Self::Bright,
    ];

    /// Stable identifier used on the wire and in the catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Grayscale => "grayscale",
            Self::Blackwhite => "blackwhite",
            Self::Contrast => "contrast",
            Self::Bright => "bright",
        }
    }

    /// Human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Original => "Original",
            Self::Grayscale => "Grayscale",
            Self::Blackwhite => "Black & White",
            Self::Contrast => "High Contrast",
            Self::Bright => "Bright",
        }
    }
}

impl FromStr for FilterId {
    type Err = ScanwerkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ScanwerkError::InvalidArgument(format!("unknown filter id {s:?}")))
    }
}

impl std::fmt::Display for FilterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Normalize a rotation to `[0, 360)`, rejecting non-multiples of 90.
pub fn normalize_rotation(degrees: i32) -> Result<u16> {
    if degrees % 90 != 0 {
        return Err(ScanwerkError::InvalidArgument(format!(
            "rotation must be a multiple of 90, got {degrees}"
        )));
    }
    Ok(degrees.rem_euclid(360) as u16)
}

/// One captured page of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Raw capture, owned by the page store.
    pub source_image_ref: ImageRef,
    /// Geometry-corrected image; absent until correction has run.
    pub corrected_image_ref: Option<ImageRef>,
    pub applied_filter: FilterId,
    /// Multiple of 90 in `[0, 360)`.
    pub rotation_degrees: u16,
    /// Absent means the full frame.
    pub crop_quad: Option<CropQuad>,
    /// Dense position within the owning document.
    pub order_index: usize,
    pub captured_at: DateTime<Utc>,
}

impl Page {
    pub fn new(id: PageId, source_image_ref: ImageRef, captured_at: DateTime<Utc>) -> Self {
        Self {
            id,
            source_image_ref,
            corrected_image_ref: None,
            applied_filter: FilterId::Original,
            rotation_degrees: 0,
            crop_quad: None,
            order_index: 0,
            captured_at,
        }
    }

    /// Add `delta` degrees (a multiple of 90) to the page rotation.
    pub fn rotate_by(&mut self, delta: i32) -> Result<()> {
        let delta = normalize_rotation(delta)?;
        self.rotation_degrees = (self.rotation_degrees + delta) % 360;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Document lifecycle: `Draft → Validated → Assembled → Persisted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    #[default]
    Draft,
    Validated,
    Assembled,
    Persisted,
}

impl DocumentState {
    /// The only state reachable by a forward transition.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Draft => Some(Self::Validated),
            Self::Validated => Some(Self::Assembled),
            Self::Assembled => Some(Self::Persisted),
            Self::Persisted => None,
        }
    }

    /// Step forward to `target`, which must be the immediate successor.
    pub fn advance_to(self, target: Self) -> Result<Self> {
        if self.next() == Some(target) {
            Ok(target)
        } else {
            Err(ScanwerkError::InvalidTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Assembled => "assembled",
            Self::Persisted => "persisted",
        }
    }
}

impl FromStr for DocumentState {
    type Err = ScanwerkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "validated" => Ok(Self::Validated),
            "assembled" => Ok(Self::Assembled),
            "persisted" => Ok(Self::Persisted),
            other => Err(ScanwerkError::InvalidArgument(format!(
                "unknown document state {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A multi-page document, either in progress or finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    pub pages: Vec<Page>,
    pub created_at: DateTime<Utc>,
    /// True size of the assembled binary; zero until assembly succeeds.
    pub size_bytes: u64,
    pub assembled_path: Option<PathBuf>,
    /// First page's corrected and filtered image, downscaled.
    pub thumbnail_ref: Option<PathBuf>,
    pub state: DocumentState,
    /// Incremented by every page edit.
    pub version: u64,
}

impl Document {
    /// Create an empty draft.
    pub fn new_draft(name: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            name: name.into(),
            pages: Vec::new(),
            created_at: Utc::now(),
            size_bytes: 0,
            assembled_path: None,
            thumbnail_ref: None,
            state: DocumentState::Draft,
            version: 0,
        }
    }

    /// Name used when the caller supplies none, e.g. `Scan_2026_03_14`.
    pub fn default_name(at: DateTime<Utc>) -> String {
        format!("Scan_{}", at.format("%Y_%m_%d"))
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Advance the lifecycle by exactly one state.
    pub fn advance(&mut self, target: DocumentState) -> Result<()> {
        self.state = self.state.advance_to(target)?;
        Ok(())
    }

    /// Return to `Draft` after a failed or cancelled step.
    pub fn rollback(&mut self) {
        self.state = DocumentState::Draft;
    }
}

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

/// Fixed folder colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderColor {
    Red,
    Orange,
    Amber,
    Yellow,
    Lime,
    Green,
    Emerald,
    Cyan,
    Sky,
    Blue,
    Violet,
    Fuchsia,
}

impl FolderColor {
    pub const PALETTE: [FolderColor; 12] = [
        Self::Red,
        Self::Orange,
        Self::Amber,
        Self::Yellow,
        Self::Lime,
        Self::Green,
        Self::Emerald,
        Self::Cyan,
        Self::Sky,
        Self::Blue,
        Self::Violet,
        Self::Fuchsia,
    ];

    pub fn hex(&self) -> &'static str {
        match self {
            Self::Red => "#DC2626",
            Self::Orange => "#EA580C",
            Self::Amber => "#D97706",
            Self::Yellow => "#CA8A04",
            Self::Lime => "#65A30D",
            Self::Green => "#16A34A",
            Self::Emerald => "#059669",
            Self::Cyan => "#0891B2",
            Self::Sky => "#0284C7",
            Self::Blue => "#2563EB",
            Self::Violet => "#7C3AED",
            Self::Fuchsia => "#C026D3",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Amber => "amber",
            Self::Yellow => "yellow",
            Self::Lime => "lime",
            Self::Green => "green",
            Self::Emerald => "emerald",
            Self::Cyan => "cyan",
            Self::Sky => "sky",
            Self::Blue => "blue",
            Self::Violet => "violet",
            Self::Fuchsia => "fuchsia",
        }
    }

    /// Deterministic palette entry for the `n`th folder.
    pub fn cycle(n: usize) -> Self {
        Self::PALETTE[n % Self::PALETTE.len()]
    }
}

impl FromStr for FolderColor {
    type Err = ScanwerkError;

    /// Accepts a palette name (`"blue"`) or its hex code (`"#2563eb"`).
    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::PALETTE
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(needle) || c.hex().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                ScanwerkError::InvalidArgument(format!("{s:?} is not in the folder palette"))
            })
    }
}

/// A user-defined folder. Membership is a back-reference only: a folder
/// never owns its documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FolderRecord")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub color: FolderColor,
    document_ids: BTreeSet<DocumentId>,
    pub created_at: DateTime<Utc>,
    document_count: usize,
}

impl Folder {
    pub fn new(name: impl Into<String>, color: FolderColor) -> Self {
        Self {
            id: FolderId::new(),
            name: name.into(),
            color,
            document_ids: BTreeSet::new(),
            created_at: Utc::now(),
            document_count: 0,
        }
    }

    /// Rebuild a folder from stored parts, checking the cached count.
    pub fn from_parts(
        id: FolderId,
        name: String,
        color: FolderColor,
        document_ids: BTreeSet<DocumentId>,
        created_at: DateTime<Utc>,
        document_count: usize,
    ) -> Result<Self> {
        if document_count != document_ids.len() {
            return Err(ScanwerkError::Database(format!(
                "folder {id} caches {document_count} documents but holds {}",
                document_ids.len()
            )));
        }
        Ok(Self {
            id,
            name,
            color,
            document_ids,
            created_at,
            document_count,
        })
    }

    pub fn document_ids(&self) -> &BTreeSet<DocumentId> {
        &self.document_ids
    }

    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.document_ids.contains(id)
    }

    /// Add a member. Returns `false` (and changes nothing) if already present.
    pub fn add_document(&mut self, id: DocumentId) -> bool {
        let inserted = self.document_ids.insert(id);
        self.document_count = self.document_ids.len();
        inserted
    }

    /// Remove a member. Returns `false` (and changes nothing) if absent.
    pub fn remove_document(&mut self, id: &DocumentId) -> bool {
        let removed = self.document_ids.remove(id);
        self.document_count = self.document_ids.len();
        removed
    }
}

/// Serialized shape of a [`Folder`]. Deserializing goes through
/// [`Folder::from_parts`] so the cached count is checked.
#[derive(Deserialize)]
struct FolderRecord {
    id: FolderId,
    name: String,
    color: FolderColor,
    document_ids: BTreeSet<DocumentId>,
    created_at: DateTime<Utc>,
    document_count: usize,
}

impl TryFrom<FolderRecord> for Folder {
    type Error = ScanwerkError;

    fn try_from(record: FolderRecord) -> Result<Self> {
        Folder::from_parts(
            record.id,
            record.name,
            record.color,
            record.document_ids,
            record.created_at,
            record.document_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Output settings
// ---------------------------------------------------------------------------

/// Standard paper sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    A4,
    A3,
    A5,
    Letter,
    Legal,
    Tabloid,
    Custom { width_mm: u32, height_mm: u32 },
}

impl PaperSize {
    /// Dimensions in millimetres (width, height), portrait.
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::A4 => (210, 297),
            Self::A3 => (297, 420),
            Self::A5 => (148, 210),
            Self::Letter => (216, 279),
            Self::Legal => (216, 356),
            Self::Tabloid => (279, 432),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    /// Page dimensions in PDF points for the given orientation.
    pub fn dimensions_pt(&self, orientation: Orientation) -> (f32, f32) {
        let (w_mm, h_mm) = self.dimensions_mm();
        let (w, h) = (mm_to_pt(w_mm as f32), mm_to_pt(h_mm as f32));
        let (short, long) = if w <= h { (w, h) } else { (h, w) };
        match orientation {
            Orientation::Portrait => (short, long),
            Orientation::Landscape => (long, short),
        }
    }
}

impl FromStr for PaperSize {
    type Err = ScanwerkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a4" => Ok(Self::A4),
            "a3" => Ok(Self::A3),
            "a5" => Ok(Self::A5),
            "letter" => Ok(Self::Letter),
            "legal" => Ok(Self::Legal),
            "tabloid" => Ok(Self::Tabloid),
            other => Err(ScanwerkError::InvalidArgument(format!(
                "unknown paper size {other:?}"
            ))),
        }
    }
}

/// Convert millimetres to PDF points (1/72 inch).
pub fn mm_to_pt(mm: f32) -> f32 {
    mm * 72.0 / 25.4
}

/// Page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Image stream quality for assembled documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl OutputQuality {
    /// JPEG quality (1-100) used for page image streams.
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            Self::Low => 55,
            Self::Medium => 75,
            Self::High => 90,
        }
    }
}

impl FromStr for OutputQuality {
    type Err = ScanwerkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ScanwerkError::InvalidArgument(format!(
                "unknown output quality {other:?}"
            ))),
        }
    }
}

/// Descriptive metadata embedded in the assembled document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
}
