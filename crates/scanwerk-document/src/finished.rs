// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A scan session once it has stopped acquiring pages.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use scanwerk_core::types::{Destination, DocumentKind, SessionId};
use tempfile::TempDir;

use crate::duplex::DuplexCandidate;
use crate::pipeline::PageBatch;

/// A page as written to the session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPage {
    pub index: usize,
    /// Repaired JPEG.
    pub path: PathBuf,
    pub declared_height: u32,
}

/// How the session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The device reported all pages done.
    Completed,
    /// Stopped from our side (duplex window elapsed, new session, shutdown).
    Closed,
    /// Device cancel or transport failure; pages so far are kept.
    Failed(String),
}

/// Everything the assembler needs. Owns the session's temporary directory.
#[derive(Debug)]
pub struct FinishedSession {
    pub id: SessionId,
    pub destination: Arc<Destination>,
    pub kind: DocumentKind,
    /// Resolution the pages were scanned at.
    pub resolution: u32,
    pub started_at: DateTime<Local>,
    pub pages: Vec<CapturedPage>,
    /// OCR jobs for `pages`, when OCR is on for this session.
    pub ocr: Option<PageBatch>,
    pub work_dir: TempDir,
    pub end: SessionEnd,
}

impl FinishedSession {
    pub fn failed(&self) -> bool {
        matches!(self.end, SessionEnd::Failed(_))
    }
}

impl DuplexCandidate for FinishedSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn duplex_eligible(&self) -> bool {
        self.destination.profile.duplex
            && self.kind == DocumentKind::Document
            && !self.failed()
            && !self.pages.is_empty()
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn pairs_with(&self, other: &Self) -> bool {
        self.destination.id == other.destination.id && self.kind == other.kind
    }
}
