// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanwerkError};
use crate::types::{FilterId, Orientation, OutputQuality, PaperSize};

/// File name of the persisted settings inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Persistent application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Paper size for newly assembled documents.
    pub default_paper_size: PaperSize,
    pub default_orientation: Orientation,
    pub output_quality: OutputQuality,
    /// Blank border around each page image, in millimetres.
    pub page_margin_mm: f32,
    /// Filter applied to freshly captured pages.
    pub default_filter: FilterId,
    /// Run edge detection and perspective correction on capture. When off,
    /// the raw capture is used as the corrected image.
    pub auto_edge_detection: bool,
    /// Detected quads scoring below this are ignored.
    pub geometry_min_confidence: f32,
    /// Entries kept by the filter result cache.
    pub filter_cache_capacity: usize,
    /// Where assembled documents are written. Defaults to `<data_dir>/documents`.
    pub save_location: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_paper_size: PaperSize::A4,
            default_orientation: Orientation::Portrait,
            output_quality: OutputQuality::High,
            page_margin_mm: 0.0,
            default_filter: FilterId::Blackwhite,
            auto_edge_detection: true,
            geometry_min_confidence: 0.6,
            filter_cache_capacity: 64,
            save_location: None,
        }
    }
}

impl AppConfig {
    /// Load `config.json` from `dir`, falling back to defaults when the file
    /// does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&data)?;
        config.check()?;
        Ok(config)
    }

    /// Write the settings to `dir/config.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.check()?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), json)?;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.geometry_min_confidence) {
            return Err(ScanwerkError::InvalidArgument(format!(
                "geometry_min_confidence must be within [0, 1], got {}",
                self.geometry_min_confidence
            )));
        }
        if !self.page_margin_mm.is_finite() || self.page_margin_mm < 0.0 {
            return Err(ScanwerkError::InvalidArgument(format!(
                "page_margin_mm must be non-negative, got {}",
                self.page_margin_mm
            )));
        }
        Ok(())
    }
}
