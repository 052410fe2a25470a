// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-document: everything that happens to a page after it leaves the scanner.
//
// Streams are repaired as they land on disk (`jpeg`), fed through external OCR
// tools by a bounded worker pool (`pipeline`), paired front/back by the duplex
// state machine (`duplex`), and finally written out as PDF or JPEG files by the
// assembler (`assembler`).

pub mod assembler;
pub mod duplex;
pub mod finished;
pub mod hocr;
pub mod jpeg;
pub mod pdf;
pub mod pipeline;
pub mod process;

pub use assembler::{AssemblerTask, AssemblyQueue, DocumentAssembler};
pub use duplex::{Assembly, DuplexCoordinator, DuplexEffect, DuplexEvent};
pub use finished::{CapturedPage, FinishedSession, SessionEnd};
pub use jpeg::{JpegRepair, write_repaired};
pub use pdf::{PdfMerger, PdfWriter};
pub use pipeline::{PageBatch, PageJob, PipelineWorkerPool, WorkerConfig};
