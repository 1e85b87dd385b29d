// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanning pipeline — document edge detection, perspective correction, and
// deterministic tone filters.

pub mod filter;
pub mod geometry;

pub use filter::{FilterCache, FilterKey, apply_filter, apply_filter_str};
pub use geometry::{Correction, GeometryCorrector};
