// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operational log capability.
//
// Components receive an `Arc<dyn OperationalLog>` at construction and report
// user-visible outcomes through it. `TracingLog` forwards to `tracing`;
// `MemoryLog` keeps events in memory so tests can assert on them.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::types::{DestinationId, SessionId};

/// Something an operator would want to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpEvent {
    Connected {
        device: String,
    },
    ConnectionLost {
        reason: String,
    },
    DestinationRegistered {
        name: String,
        id: DestinationId,
    },
    SessionStarted {
        session: SessionId,
        destination: String,
    },
    /// An event arrived that no session could accept.
    EventRejected {
        reason: String,
    },
    PageCaptured {
        session: SessionId,
        page: usize,
    },
    PageFailed {
        session: SessionId,
        page: usize,
        reason: String,
    },
    SessionFinished {
        session: SessionId,
        pages: usize,
    },
    SessionFailed {
        session: SessionId,
        reason: String,
    },
    StepFailed {
        input: PathBuf,
        step: String,
        reason: String,
    },
    DocumentSaved {
        path: PathBuf,
        pages: usize,
        duplex: bool,
    },
    AssemblyFailed {
        reason: String,
    },
    CleanupFailed {
        path: PathBuf,
        reason: String,
    },
}

/// Sink for operational events.
pub trait OperationalLog: Send + Sync {
    fn record(&self, event: OpEvent);
}

/// Production sink: structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl OperationalLog for TracingLog {
    fn record(&self, event: OpEvent) {
        match event {
            OpEvent::Connected { device } => info!(%device, "connected to device"),
            OpEvent::ConnectionLost { reason } => error!(%reason, "device connection lost"),
            OpEvent::DestinationRegistered { name, id } => {
                info!(%name, %id, "destination registered")
            }
            OpEvent::SessionStarted {
                session,
                destination,
            } => info!(%session, %destination, "scan session started"),
            OpEvent::EventRejected { reason } => warn!(%reason, "event rejected"),
            OpEvent::PageCaptured { session, page } => info!(%session, page, "page captured"),
            OpEvent::PageFailed {
                session,
                page,
                reason,
            } => warn!(%session, page, %reason, "page dropped"),
            OpEvent::SessionFinished { session, pages } => {
                info!(%session, pages, "scan session finished")
            }
            OpEvent::SessionFailed { session, reason } => {
                error!(%session, %reason, "scan session failed")
            }
            OpEvent::StepFailed {
                input,
                step,
                reason,
            } => warn!(input = %input.display(), %step, %reason, "pipeline step failed"),
            OpEvent::DocumentSaved {
                path,
                pages,
                duplex,
            } => info!(path = %path.display(), pages, duplex, "document saved"),
            OpEvent::AssemblyFailed { reason } => error!(%reason, "document assembly failed"),
            OpEvent::CleanupFailed { path, reason } => {
                warn!(path = %path.display(), %reason, "temporary cleanup failed")
            }
        }
    }
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemoryLog {
    events: Mutex<Vec<OpEvent>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far.
    pub fn snapshot(&self) -> Vec<OpEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OperationalLog for MemoryLog {
    fn record(&self, event: OpEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
