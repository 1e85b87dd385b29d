// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-document — Page image processing for the Scanwerk scanner.
//
// Provides image helpers (decode, quarter-turn rotation, thumbnails, encoding),
// the scanning pipeline (document edge detection with perspective unwarp, tone
// filters) and PDF assembly with a structural inspector for the output.

pub mod image;
pub mod pdf;
pub mod scan;

// Re-export the primary structs so callers can use `scanwerk_document::GeometryCorrector` etc.
pub use crate::image::processor::ImageProcessor;
pub use pdf::assembler::{AssembledFile, AssemblyOptions, CancelFlag, DocumentAssembler};
pub use pdf::reader::{PdfInspector, PdfLayout};
pub use scan::filter::{FilterCache, FilterKey, apply_filter, apply_filter_str};
pub use scan::geometry::{Correction, GeometryCorrector};
