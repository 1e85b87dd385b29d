// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-engine — Page editing, the document lifecycle, and the async scan
// service that ties the page store, corrector, filters, assembler and
// catalog together.

pub mod data_dir;
pub mod editor;
mod output;
pub mod render;
pub mod service;
pub mod session;

pub use editor::{PageEditor, PageSnapshot};
pub use service::{
    AssemblyHandle, AssemblyRequest, CorrectionHandle, CorrectionOutcome, ScanService,
    ServiceEvent, configured_options,
};
pub use session::{DocumentSession, DocumentSink};
