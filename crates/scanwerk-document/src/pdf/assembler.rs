// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document assembler — builds a multi-page PDF from page images with `lopdf`
// and writes it to disk atomically.
//
// Object layout (numbered from 1): for each page an image XObject, its content
// stream and the page dictionary; then the page tree, the catalog and the
// document information dictionary.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use lopdf::xref::XrefType;
use lopdf::{Document, Object, Stream, StringFormat, dictionary};
use scanwerk_core::error::ScanwerkError;
use scanwerk_core::{DocumentMetadata, Orientation, OutputQuality, PaperSize, mm_to_pt};
use tracing::{debug, info, instrument, warn};

use crate::image::processor::ImageProcessor;

/// Shared cancellation signal for an in-flight assembly.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ScanwerkError> {
        if self.is_cancelled() {
            Err(ScanwerkError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Page layout and encoding settings.
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub paper_size: PaperSize,
    pub orientation: Orientation,
    /// Blank border inside the page edge, in millimetres.
    pub margin_mm: f32,
    pub quality: OutputQuality,
    pub metadata: DocumentMetadata,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            paper_size: PaperSize::A4,
            orientation: Orientation::Portrait,
            margin_mm: 0.0,
            quality: OutputQuality::High,
            metadata: DocumentMetadata::default(),
        }
    }
}

/// A finished document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub path: PathBuf,
    /// True byte size of the written file.
    pub size_bytes: u64,
    pub page_count: usize,
}

/// Assembles rendered page images into a PDF.
///
/// Each image is scaled uniformly to fit inside the usable page area and
/// centred; nothing is rotated or cropped.
#[derive(Debug, Clone, Default)]
pub struct DocumentAssembler {
    options: AssemblyOptions,
}

impl DocumentAssembler {
    pub fn new(options: AssemblyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    /// Build the PDF in memory.
    ///
    /// `cancel` is checked before every page; `progress(done, total)` is called
    /// after each page is embedded.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn assemble(
        &self,
        pages: &[Vec<u8>],
        cancel: &CancelFlag,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Vec<u8>, ScanwerkError> {
        if pages.is_empty() {
            return Err(ScanwerkError::Assembly("document has no pages".into()));
        }

        let (page_w, page_h) = self
            .options
            .paper_size
            .dimensions_pt(self.options.orientation);
        let margin = mm_to_pt(self.options.margin_mm.max(0.0));
        let usable_w = (page_w - 2.0 * margin).max(1.0);
        let usable_h = (page_h - 2.0 * margin).max(1.0);
        let jpeg_quality = self.options.quality.jpeg_quality();

        info!(
            page_w,
            page_h,
            margin,
            jpeg_quality,
            "Assembling document"
        );

        let mut doc = Document::with_version("1.5");
        let mut page_ids = Vec::with_capacity(pages.len());

        for (index, bytes) in pages.iter().enumerate() {
            cancel.check()?;

            let processor = ImageProcessor::from_bytes(bytes).map_err(|err| {
                ScanwerkError::Assembly(format!("page {}: {}", index + 1, err))
            })?;
            let (img_w, img_h) = (processor.width(), processor.height());
            let color_space = if processor.is_grayscale() {
                "DeviceGray"
            } else {
                "DeviceRGB"
            };
            let jpeg = processor.to_jpeg_bytes(jpeg_quality).map_err(|err| {
                ScanwerkError::Assembly(format!("page {}: {}", index + 1, err))
            })?;

            // Letterbox: uniform scale, centred in the usable area.
            let scale = (usable_w / img_w as f32).min(usable_h / img_h as f32);
            let draw_w = img_w as f32 * scale;
            let draw_h = img_h as f32 * scale;
            let x = margin + (usable_w - draw_w) / 2.0;
            let y = margin + (usable_h - draw_h) / 2.0;

            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => img_w as i64,
                    "Height" => img_h as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8i64,
                    "Filter" => "DCTDecode",
                },
                jpeg,
            ));

            let image_name = format!("Im{}", index + 1);
            let content = format!(
                "q\n{:.3} 0 0 {:.3} {:.3} {:.3} cm\n/{} Do\nQ\n",
                draw_w, draw_h, x, y, image_name
            );
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(page_w),
                    Object::Real(page_h),
                ],
                "Contents" => Object::Reference(content_id),
                "Resources" => dictionary! {
                    "XObject" => dictionary! {
                        image_name.as_str() => Object::Reference(image_id),
                    },
                },
            });
            page_ids.push(page_id);

            debug!(page = index + 1, img_w, img_h, scale, "Page embedded");
            progress(index + 1, pages.len());
        }

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
        });

        for page_id in &page_ids {
            let page = doc
                .get_object_mut(*page_id)
                .and_then(Object::as_dict_mut)
                .map_err(|err| ScanwerkError::Pdf(format!("page object missing: {}", err)))?;
            page.set("Parent", Object::Reference(pages_id));
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        let info_id = doc.add_object(info_dictionary(&self.options.metadata));

        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc.trailer.set("Info", Object::Reference(info_id));

        // Classic `xref` table, one fixed-width entry per object.
        doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;
        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|err| ScanwerkError::Assembly(format!("failed to serialise PDF: {}", err)))?;

        debug!(output_bytes = output.len(), "Document serialised");
        Ok(output)
    }

    /// Assemble and write to `final_path`.
    ///
    /// The bytes go to a hidden temporary file in the destination directory,
    /// which is synced and then renamed over `final_path`. On any error or
    /// cancellation the temporary file is removed and `final_path` is left
    /// untouched.
    #[instrument(skip(self, pages, cancel, progress), fields(pages = pages.len(), path = %final_path.display()))]
    pub fn assemble_to_path(
        &self,
        pages: &[Vec<u8>],
        final_path: &Path,
        cancel: &CancelFlag,
        progress: impl FnMut(usize, usize),
    ) -> Result<AssembledFile, ScanwerkError> {
        let bytes = self.assemble(pages, cancel, progress)?;
        let temp_path = temp_path_for(final_path)?;

        match write_and_commit(&bytes, &temp_path, final_path, cancel) {
            Ok(()) => {
                info!(size_bytes = bytes.len(), "Document written");
                Ok(AssembledFile {
                    path: final_path.to_path_buf(),
                    size_bytes: bytes.len() as u64,
                    page_count: pages.len(),
                })
            }
            Err(err) => {
                if let Err(rm_err) = std::fs::remove_file(&temp_path) {
                    if rm_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %temp_path.display(), %rm_err, "Could not remove temporary file");
                    }
                }
                Err(err)
            }
        }
    }
}

fn write_and_commit(
    bytes: &[u8],
    temp_path: &Path,
    final_path: &Path,
    cancel: &CancelFlag,
) -> Result<(), ScanwerkError> {
    let mut file = File::create(temp_path)
        .map_err(|err| ScanwerkError::Assembly(format!("cannot create {}: {}", temp_path.display(), err)))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| ScanwerkError::Assembly(format!("cannot write {}: {}", temp_path.display(), err)))?;
    drop(file);

    cancel.check()?;

    std::fs::rename(temp_path, final_path).map_err(|err| {
        ScanwerkError::Assembly(format!("cannot move into {}: {}", final_path.display(), err))
    })
}

/// `dir/.name.<uuid>.part` next to the destination.
fn temp_path_for(final_path: &Path) -> Result<PathBuf, ScanwerkError> {
    let name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ScanwerkError::InvalidArgument(format!(
                "destination {} has no file name",
                final_path.display()
            ))
        })?;
    let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple())))
}

fn info_dictionary(metadata: &DocumentMetadata) -> lopdf::Dictionary {
    let text = |s: &str| Object::String(s.as_bytes().to_vec(), StringFormat::Literal);

    let mut info = dictionary! {
        "Producer" => text("Scanwerk"),
        "CreationDate" => text(&Utc::now().format("D:%Y%m%d%H%M%SZ").to_string()),
    };
    if let Some(title) = &metadata.title {
        info.set("Title", text(title));
    }
    if let Some(author) = &metadata.author {
        info.set("Author", text(author));
    }
    if let Some(subject) = &metadata.subject {
        info.set("Subject", text(subject));
    }
    if !metadata.keywords.is_empty() {
        info.set("Keywords", text(&metadata.keywords.join(", ")));
    }
    info
}
