// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF output: rendering scanned pages and concatenating per-page PDFs.

pub mod merge;
pub mod writer;

pub use merge::{PdfMerger, page_count};
pub use writer::PdfWriter;
