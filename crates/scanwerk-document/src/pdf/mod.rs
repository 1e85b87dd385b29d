// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module — multi-page assembly from page images, and structural
// inspection of the result.

pub mod assembler;
pub mod reader;

pub use assembler::{AssembledFile, AssemblyOptions, CancelFlag, DocumentAssembler};
pub use reader::{PdfInspector, PdfLayout};
