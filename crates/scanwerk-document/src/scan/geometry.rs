// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Geometry corrector — finds the document quadrilateral in a captured page
// and unwarps it to an upright rectangle.

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use imageproc::hough::{LineDetectionOptions, PolarLine, detect_lines};
use scanwerk_core::CropQuad;
use scanwerk_core::error::ScanwerkError;
use tracing::{debug, info, instrument, warn};

use crate::image::processor::ImageProcessor;

/// Result of running the corrector on one capture.
#[derive(Debug, Clone)]
pub struct Correction {
    /// Unwarped PNG, or the untouched input when no quad was accepted.
    pub image_bytes: Vec<u8>,
    /// The accepted quad in normalized input coordinates. `None` is the
    /// low-confidence fallback.
    pub quad: Option<CropQuad>,
    /// Edge support of the best candidate quad, in `[0, 1]`. Zero when no
    /// candidate was found.
    pub confidence: f32,
}

impl Correction {
    /// Whether the image was actually unwarped.
    pub fn was_corrected(&self) -> bool {
        self.quad.is_some()
    }
}

/// A candidate document boundary in pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    /// `[top_left, top_right, bottom_right, bottom_left]`.
    pub corners: [(f32, f32); 4],
    pub confidence: f32,
}

/// Perspective corrector for captured pages.
///
/// ## Pipeline
///
/// 1. Grayscale, Gaussian blur (sigma 2.0), Canny edges (50/150)
/// 2. Hough lines, vote threshold scaled to the image diagonal
/// 3. Split into near-horizontal and near-vertical lines and take the
///    outermost line of each side
/// 4. Intersect to four corners; reject concave or tiny quads
/// 5. Score the quad by edge support along its sides
/// 6. Above `min_confidence`, warp the quad to an upright rectangle
///
/// Every rejection path returns the input unchanged, so running the corrector
/// on its own output is a no-op.
#[derive(Debug, Clone)]
pub struct GeometryCorrector {
    min_confidence: f32,
    /// Quads whose every side lies within this fraction of the frame border
    /// are treated as "already cropped".
    full_frame_margin: f32,
    blur_sigma: f32,
    canny_low: f32,
    canny_high: f32,
}

impl Default for GeometryCorrector {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            full_frame_margin: 0.03,
            blur_sigma: 2.0,
            canny_low: 50.0,
            canny_high: 150.0,
        }
    }
}

impl GeometryCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Detect and unwarp the document in `data`.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn correct(&self, data: &[u8]) -> Result<Correction, ScanwerkError> {
        let image = ImageProcessor::from_bytes(data)?.into_dynamic();
        let (w, h) = (image.width(), image.height());

        let Some(detection) = self.detect(&image) else {
            return Ok(unchanged(data, 0.0));
        };

        if detection.confidence < self.min_confidence {
            warn!(
                confidence = detection.confidence,
                min_confidence = self.min_confidence,
                "Quad confidence below threshold; keeping capture as-is"
            );
            return Ok(unchanged(data, detection.confidence));
        }

        if self.hugs_frame(&detection.corners, w, h) {
            debug!("Quad coincides with the frame; nothing to correct");
            return Ok(unchanged(data, detection.confidence));
        }

        let quad = match CropQuad::from_pixel_corners(detection.corners, w, h) {
            Ok(q) => q,
            Err(err) => {
                warn!(%err, "Detected corners do not form a usable quad");
                return Ok(unchanged(data, detection.confidence));
            }
        };

        let warped = warp_quad(&image, detection.corners)?;
        let image_bytes = ImageProcessor::from_dynamic(warped).to_png_bytes()?;

        info!(
            confidence = detection.confidence,
            out_bytes = image_bytes.len(),
            "Perspective correction applied"
        );

        Ok(Correction {
            image_bytes,
            quad: Some(quad),
            confidence: detection.confidence,
        })
    }

    /// Unwarp `data` using an explicit quad (manual re-crop).
    ///
    /// The full-frame quad returns the input bytes unchanged.
    #[instrument(skip(self, data, quad), fields(data_len = data.len()))]
    pub fn unwarp(&self, data: &[u8], quad: &CropQuad) -> Result<Vec<u8>, ScanwerkError> {
        if quad.is_full_frame(1e-6) {
            return Ok(data.to_vec());
        }
        let image = ImageProcessor::from_bytes(data)?.into_dynamic();
        let corners = quad.to_pixel_corners(image.width(), image.height());
        let warped = warp_quad(&image, corners)?;
        ImageProcessor::from_dynamic(warped).to_png_bytes()
    }

    /// Find the most plausible document quad in `image`, if any.
    pub fn detect(&self, image: &DynamicImage) -> Option<Detection> {
        let (w, h) = (image.width(), image.height());
        if w < 8 || h < 8 {
            return None;
        }

        let gray = image.to_luma8();
        let blurred = gaussian_blur_f32(&gray, self.blur_sigma);
        let edges = canny(&blurred, self.canny_low, self.canny_high);

        let diagonal = ((w as f64).powi(2) + (h as f64).powi(2)).sqrt();
        let vote_threshold = (diagonal * 0.25).max(80.0) as u32;
        let lines = detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold,
                suppression_radius: 8,
            },
        );
        debug!(line_count = lines.len(), vote_threshold, "Hough lines detected");

        let (horizontal, vertical) = classify_lines(&lines);
        if horizontal.len() < 2 || vertical.len() < 2 {
            debug!(
                horizontal = horizontal.len(),
                vertical = vertical.len(),
                "Not enough document edges"
            );
            return None;
        }

        let centre = (w as f32 / 2.0, h as f32 / 2.0);
        let (top, bottom) = extremes(&horizontal, |l| y_at(l, centre.0))?;
        let (left, right) = extremes(&vertical, |l| x_at(l, centre.1))?;

        let corners = [
            intersect_polar_lines(&top, &left)?,
            intersect_polar_lines(&top, &right)?,
            intersect_polar_lines(&bottom, &right)?,
            intersect_polar_lines(&bottom, &left)?,
        ];

        if !is_convex(&corners) {
            debug!(?corners, "Quad is not convex");
            return None;
        }
        let area = shoelace_area(&corners);
        let frame = w as f32 * h as f32;
        if area < frame * 0.10 {
            debug!(area, min_area = frame * 0.10, "Quad too small");
            return None;
        }

        let confidence = edge_support(&edges, &corners);
        debug!(?corners, confidence, "Candidate quad");
        Some(Detection {
            corners,
            confidence,
        })
    }

    fn hugs_frame(&self, corners: &[(f32, f32); 4], w: u32, h: u32) -> bool {
        let mx = w as f32 * self.full_frame_margin;
        let my = h as f32 * self.full_frame_margin;
        let (wf, hf) = (w as f32, h as f32);
        let [tl, tr, br, bl] = *corners;
        tl.0 <= mx
            && bl.0 <= mx
            && tr.0 >= wf - mx
            && br.0 >= wf - mx
            && tl.1 <= my
            && tr.1 <= my
            && bl.1 >= hf - my
            && br.1 >= hf - my
    }
}

fn unchanged(data: &[u8], confidence: f32) -> Correction {
    Correction {
        image_bytes: data.to_vec(),
        quad: None,
        confidence,
    }
}

/// Warp the region bounded by `corners` to an upright rectangle. Width is the
/// longer of the top and bottom edges, height the longer of the side edges.
fn warp_quad(image: &DynamicImage, corners: [(f32, f32); 4]) -> Result<DynamicImage, ScanwerkError> {
    let [tl, tr, br, bl] = corners;
    let out_w = distance(tl, tr).max(distance(bl, br)).round().max(1.0) as u32;
    let out_h = distance(tl, bl).max(distance(tr, br)).round().max(1.0) as u32;

    let dest = [
        (0.0, 0.0),
        (out_w as f32, 0.0),
        (out_w as f32, out_h as f32),
        (0.0, out_h as f32),
    ];
    let projection = Projection::from_control_points(corners, dest).ok_or_else(|| {
        ScanwerkError::Image("quad corners do not define a projective transform".into())
    })?;

    let mut output = RgbImage::new(out_w, out_h);
    warp_into(
        &image.to_rgb8(),
        &projection,
        Interpolation::Bilinear,
        Rgb([255u8, 255, 255]),
        &mut output,
    );
    debug!(out_w, out_h, "Quad warped");

    Ok(if image.color().has_color() {
        DynamicImage::ImageRgb8(output)
    } else {
        DynamicImage::ImageRgb8(output).grayscale()
    })
}

// -- Line helpers -------------------------------------------------------------

/// Split Hough lines into near-horizontal and near-vertical sets.
///
/// imageproc lines satisfy `x·cos θ + y·sin θ = r`, so θ near 90 is a
/// horizontal line and θ near 0 or 180 a vertical one. Lines more than 30
/// degrees off either axis are discarded.
fn classify_lines(lines: &[PolarLine]) -> (Vec<PolarLine>, Vec<PolarLine>) {
    let mut horizontal = Vec::new();
    let mut vertical = Vec::new();

    for line in lines {
        let angle = line.angle_in_degrees;
        if (60..=120).contains(&angle) {
            horizontal.push(*line);
        } else if angle <= 30 || angle >= 150 {
            vertical.push(*line);
        }
    }

    (horizontal, vertical)
}

/// The lines minimizing and maximizing `position`.
fn extremes(
    lines: &[PolarLine],
    position: impl Fn(&PolarLine) -> Option<f32>,
) -> Option<(PolarLine, PolarLine)> {
    let mut placed: Vec<(f32, PolarLine)> = lines
        .iter()
        .filter_map(|l| position(l).map(|p| (p, *l)))
        .collect();
    if placed.len() < 2 {
        return None;
    }
    placed.sort_by(|a, b| a.0.total_cmp(&b.0));
    let first = placed.first()?.1;
    let last = placed.last()?.1;
    Some((first, last))
}

/// Y coordinate where a near-horizontal line crosses column `x`.
fn y_at(line: &PolarLine, x: f32) -> Option<f32> {
    let theta = (line.angle_in_degrees as f32).to_radians();
    let sin = theta.sin();
    (sin.abs() > 1e-3).then(|| (line.r - x * theta.cos()) / sin)
}

/// X coordinate where a near-vertical line crosses row `y`.
fn x_at(line: &PolarLine, y: f32) -> Option<f32> {
    let theta = (line.angle_in_degrees as f32).to_radians();
    let cos = theta.cos();
    (cos.abs() > 1e-3).then(|| (line.r - y * theta.sin()) / cos)
}

/// Intersection of two lines in Hough normal form; `None` when parallel.
fn intersect_polar_lines(a: &PolarLine, b: &PolarLine) -> Option<(f32, f32)> {
    let theta_a = (a.angle_in_degrees as f64).to_radians();
    let theta_b = (b.angle_in_degrees as f64).to_radians();
    let (sin_a, cos_a) = theta_a.sin_cos();
    let (sin_b, cos_b) = theta_b.sin_cos();

    let denom = cos_a * sin_b - sin_a * cos_b;
    if denom.abs() < 1e-6 {
        return None;
    }

    let (r_a, r_b) = (a.r as f64, b.r as f64);
    let x = (r_a * sin_b - r_b * sin_a) / denom;
    let y = (r_b * cos_a - r_a * cos_b) / denom;
    Some((x as f32, y as f32))
}

// -- Quad helpers -------------------------------------------------------------

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn shoelace_area(corners: &[(f32, f32); 4]) -> f32 {
    let mut area = 0.0f32;
    for i in 0..4 {
        let j = (i + 1) % 4;
        area += corners[i].0 * corners[j].1;
        area -= corners[j].0 * corners[i].1;
    }
    area.abs() / 2.0
}

fn is_convex(corners: &[(f32, f32); 4]) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let c = corners[(i + 2) % 4];
        let cross = (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0);
        if cross.abs() < f32::EPSILON {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Mean fraction of sample points along the four sides that have an edge
/// pixel within 2 px.
fn edge_support(edges: &GrayImage, corners: &[(f32, f32); 4]) -> f32 {
    const TOLERANCE: i64 = 2;
    let (w, h) = (edges.width() as i64, edges.height() as i64);

    let near_edge = |x: f32, y: f32| -> bool {
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        for dy in -TOLERANCE..=TOLERANCE {
            for dx in -TOLERANCE..=TOLERANCE {
                let (px, py) = (cx + dx, cy + dy);
                if px >= 0 && py >= 0 && px < w && py < h && edges.get_pixel(px as u32, py as u32).0[0] > 0 {
                    return true;
                }
            }
        }
        false
    };

    let mut total = 0.0f32;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let samples = (distance(a, b).round() as usize).clamp(2, 2000);
        let mut hits = 0usize;
        for s in 0..samples {
            let t = (s as f32 + 0.5) / samples as f32;
            if near_edge(a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t) {
                hits += 1;
            }
        }
        total += hits as f32 / samples as f32;
    }
    total / 4.0
}
