// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan sessions.
//
// A session starts when the user picks one of our destinations on the panel
// and ends when the device says all pages are done, when it is closed from
// our side, or when its job fails. Each scan request becomes one device job,
// polled on its own task; pages come back to the controller as messages so
// that every state change happens on the dispatch loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use scanwerk_core::config::TimingConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use scanwerk_core::types::{Destination, DestinationId, DocumentKind, SessionId};
use scanwerk_document::{
    CapturedPage, FinishedSession, PageBatch, PageJob, PipelineWorkerPool, SessionEnd,
    write_repaired,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::DeviceApi;
use crate::ledm::{JobState, ReadyPage, ScanJobSettings};

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Destination picked, no scan requested yet.
    AwaitingJob,
    Scanning,
    /// The last session has been handed off.
    Completed,
}

/// Reports from job tasks.
#[derive(Debug)]
pub enum SessionMessage {
    PageCaptured {
        session: SessionId,
        path: PathBuf,
        declared_height: u32,
    },
    JobFinished {
        session: SessionId,
        outcome: Result<()>,
    },
}

/// What a message meant for the current session.
#[derive(Debug)]
pub enum SessionUpdate {
    /// Not for the current session.
    Ignored,
    /// The session made progress.
    Activity(SessionId),
    Ended(FinishedSession),
}

struct ActiveSession {
    id: SessionId,
    destination: Arc<Destination>,
    kind: Option<DocumentKind>,
    resolution: u32,
    started_at: chrono::DateTime<Local>,
    pages: Vec<CapturedPage>,
    ocr: Option<PageBatch>,
    work_dir: TempDir,
    job: Option<JoinHandle<()>>,
    jobs_started: usize,
    complete_requested: bool,
}

impl ActiveSession {
    fn add_page(&mut self, path: PathBuf, declared_height: u32, log: &dyn OperationalLog) {
        let index = self.pages.len();
        if let Some(batch) = self.ocr.as_mut() {
            batch.submit(PageJob::new(
                index,
                path.clone(),
                declared_height,
                self.work_dir.path(),
            ));
        }
        self.pages.push(CapturedPage {
            index,
            path,
            declared_height,
        });
        log.record(OpEvent::PageCaptured {
            session: self.id,
            page: index + 1,
        });
    }
}

/// Drives at most one session at a time.
pub struct ScanSessionController {
    device: Arc<dyn DeviceApi>,
    timing: TimingConfig,
    pool: Option<PipelineWorkerPool>,
    log: Arc<dyn OperationalLog>,
    tx: mpsc::UnboundedSender<SessionMessage>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
    current: Option<ActiveSession>,
    phase: SessionPhase,
}

impl ScanSessionController {
    /// `pool` is `None` when OCR is unavailable; sessions then skip OCR even
    /// for destinations that ask for it.
    pub fn new(
        device: Arc<dyn DeviceApi>,
        timing: TimingConfig,
        pool: Option<PipelineWorkerPool>,
        log: Arc<dyn OperationalLog>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            device,
            timing,
            pool,
            log,
            tx,
            rx,
            current: None,
            phase: SessionPhase::Idle,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|s| s.id)
    }

    /// The open session, if it belongs to `destination`.
    pub fn session_for(&self, destination: &DestinationId) -> Option<SessionId> {
        self.current
            .as_ref()
            .filter(|s| s.destination.id == *destination)
            .map(|s| s.id)
    }

    /// Next report from a job task.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        self.rx.recv().await
    }

    // -- Transitions --

    /// `HostSelected`: open a session for `destination`. A session still
    /// open is closed first and returned.
    #[instrument(skip_all, fields(destination = %destination.display_name))]
    pub async fn start(
        &mut self,
        destination: Arc<Destination>,
    ) -> Result<(SessionId, Option<FinishedSession>)> {
        let work_dir = tempfile::Builder::new()
            .prefix("scanwerk-")
            .tempdir()
            .map_err(|e| ScanwerkError::Resource(format!("cannot create session directory: {e}")))?;

        let previous = match self.current.take() {
            Some(open) => Some(self.finish(open, SessionEnd::Closed).await),
            None => None,
        };

        let id = SessionId::new();
        let ocr = match (&self.pool, destination.profile.ocr) {
            (Some(pool), true) => Some(pool.batch()),
            _ => None,
        };
        debug!(session = %id, dir = %work_dir.path().display(), ocr = ocr.is_some(), "session opened");
        self.log.record(OpEvent::SessionStarted {
            session: id,
            destination: destination.display_name.clone(),
        });

        self.current = Some(ActiveSession {
            id,
            resolution: destination.profile.document.resolution,
            destination,
            kind: None,
            started_at: Local::now(),
            pages: Vec::new(),
            ocr,
            work_dir,
            job: None,
            jobs_started: 0,
            complete_requested: false,
        });
        self.phase = SessionPhase::AwaitingJob;
        Ok((id, previous))
    }

    /// `ScanRequested` / `ScanNewPageRequested`: submit a job and start
    /// polling it.
    ///
    /// Without a session, or while a job is still running, the request is a
    /// `Protocol` error and nothing changes. Device errors are `Transport`.
    #[instrument(skip(self))]
    pub async fn scan(&mut self, kind: DocumentKind) -> Result<()> {
        let Some(session) = self.current.as_mut() else {
            return Err(ScanwerkError::Protocol(
                "scan requested without a selected destination".into(),
            ));
        };
        if session.job.is_some() {
            return Err(ScanwerkError::Protocol(
                "scan requested while a job is still running".into(),
            ));
        }

        let kind = match session.kind {
            Some(first) if first != kind => {
                warn!(?first, requested = ?kind, "document kind changed mid-session, keeping the first");
                first
            }
            Some(first) => first,
            None => kind,
        };

        let source = self.device.scan_status().await?.source();
        let caps = self.device.scan_caps().await?;
        let profile = session.destination.profile.scan_profile(kind).clone();
        let cap = profile.resolution_for(source);
        let resolution = select_resolution(caps.resolutions(source), cap).ok_or_else(|| {
            ScanwerkError::Protocol(format!(
                "device reports no resolutions for {}",
                source.wire_name()
            ))
        })?;

        let settings = ScanJobSettings {
            resolution,
            source,
            kind,
            profile,
        };
        let job_url = self.device.submit_job(&settings).await?;
        info!(session = %session.id, %job_url, resolution, source = source.wire_name(), "scan job submitted");

        if session.kind.is_none() {
            session.kind = Some(kind);
            session.resolution = resolution;
        }
        session.jobs_started += 1;

        let job = JobRunner {
            device: Arc::clone(&self.device),
            job_url,
            session: session.id,
            dir: session.work_dir.path().to_path_buf(),
            job_no: session.jobs_started,
            poll_interval: self.timing.job_poll_interval(),
            download_timeout: self.timing.page_download_timeout(),
            log: Arc::clone(&self.log),
            tx: self.tx.clone(),
        };
        session.job = Some(tokio::spawn(job.run()));
        self.phase = SessionPhase::Scanning;
        Ok(())
    }

    /// `ScanPagesComplete`. The session ends now, or as soon as its running
    /// job finishes.
    pub async fn complete(&mut self) -> Result<Option<FinishedSession>> {
        let Some(session) = self.current.as_mut() else {
            return Err(ScanwerkError::Protocol(
                "pages complete without an active session".into(),
            ));
        };
        if session.job.is_some() {
            debug!(session = %session.id, "completion requested, waiting for the job");
            session.complete_requested = true;
            return Ok(None);
        }
        let Some(session) = self.current.take() else {
            return Ok(None);
        };
        Ok(Some(self.finish(session, SessionEnd::Completed).await))
    }

    /// Apply a job report.
    pub async fn on_message(&mut self, message: SessionMessage) -> SessionUpdate {
        let target = match &message {
            SessionMessage::PageCaptured { session, .. } => *session,
            SessionMessage::JobFinished { session, .. } => *session,
        };
        let Some(session) = self.current.as_mut().filter(|s| s.id == target) else {
            debug!(session = %target, "report for a session that is no longer open");
            return SessionUpdate::Ignored;
        };

        match message {
            SessionMessage::PageCaptured {
                path,
                declared_height,
                ..
            } => {
                session.add_page(path, declared_height, self.log.as_ref());
                SessionUpdate::Activity(target)
            }
            SessionMessage::JobFinished { outcome, .. } => {
                session.job = None;
                let end = match outcome {
                    Ok(()) if session.complete_requested => SessionEnd::Completed,
                    Ok(()) => return SessionUpdate::Activity(target),
                    Err(e) => SessionEnd::Failed(e.to_string()),
                };
                match self.current.take() {
                    Some(session) => SessionUpdate::Ended(self.finish(session, end).await),
                    None => SessionUpdate::Ignored,
                }
            }
        }
    }

    /// Stop session `id` if it is the open one.
    pub async fn close(&mut self, id: SessionId, end: SessionEnd) -> Option<FinishedSession> {
        if self.current_id() != Some(id) {
            return None;
        }
        let session = self.current.take()?;
        Some(self.finish(session, end).await)
    }

    /// Abort the open session, keeping its pages.
    pub async fn fail(&mut self, reason: impl Into<String>) -> Option<FinishedSession> {
        let session = self.current.take()?;
        Some(self.finish(session, SessionEnd::Failed(reason.into())).await)
    }

    async fn finish(&mut self, mut session: ActiveSession, end: SessionEnd) -> FinishedSession {
        if let Some(job) = session.job.take() {
            job.abort();
            let _ = job.await;
            // The job can no longer send; pick up pages it reported before
            // stopping.
            while let Ok(message) = self.rx.try_recv() {
                if let SessionMessage::PageCaptured {
                    session: id,
                    path,
                    declared_height,
                } = message
                {
                    if id == session.id {
                        session.add_page(path, declared_height, self.log.as_ref());
                    }
                }
            }
        }

        match &end {
            SessionEnd::Failed(reason) => self.log.record(OpEvent::SessionFailed {
                session: session.id,
                reason: reason.clone(),
            }),
            SessionEnd::Completed | SessionEnd::Closed => self.log.record(OpEvent::SessionFinished {
                session: session.id,
                pages: session.pages.len(),
            }),
        }
        self.phase = SessionPhase::Completed;

        FinishedSession {
            id: session.id,
            destination: session.destination,
            kind: session.kind.unwrap_or(DocumentKind::Document),
            resolution: session.resolution,
            started_at: session.started_at,
            pages: session.pages,
            ocr: session.ocr,
            work_dir: session.work_dir,
            end,
        }
    }
}

/// Highest supported resolution not above `cap`; the lowest one when all
/// are above it.
pub fn select_resolution(supported: &[u32], cap: u32) -> Option<u32> {
    let mut sorted = supported.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .rev()
        .find(|r| **r <= cap)
        .or_else(|| sorted.first())
        .copied()
}

// ---------------------------------------------------------------------------
// Job polling
// ---------------------------------------------------------------------------

struct JobRunner {
    device: Arc<dyn DeviceApi>,
    job_url: String,
    session: SessionId,
    dir: PathBuf,
    job_no: usize,
    poll_interval: Duration,
    download_timeout: Duration,
    log: Arc<dyn OperationalLog>,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl JobRunner {
    async fn run(self) {
        let outcome = self.poll().await;
        if let Err(e) = &outcome {
            warn!(session = %self.session, job = %self.job_url, error = %e, "scan job ended with an error");
        }
        let _ = self.tx.send(SessionMessage::JobFinished {
            session: self.session,
            outcome,
        });
    }

    async fn poll(&self) -> Result<()> {
        let mut last_url: Option<String> = None;
        let mut seq = 0usize;

        loop {
            let status = self.device.job_status(&self.job_url).await?;
            match status.state {
                JobState::Completed => return Ok(()),
                JobState::Canceled => {
                    return Err(ScanwerkError::Protocol("scan job canceled".into()));
                }
                JobState::Processing | JobState::Other(_) => {}
            }
            if status.canceled_by_device {
                return Err(ScanwerkError::Protocol(
                    "scan job canceled on the device".into(),
                ));
            }

            if let Some(page) = status.ready_page {
                if last_url.as_deref() != Some(page.binary_url.as_str()) {
                    seq += 1;
                    last_url = Some(page.binary_url.clone());
                    self.fetch(page, seq).await?;
                    continue;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Download one page. Malformed images are dropped; anything else ends
    /// the job.
    async fn fetch(&self, page: ReadyPage, seq: usize) -> Result<()> {
        let path = self
            .dir
            .join(format!("job{:02}-page{seq:04}.jpg", self.job_no));

        match self.download(&page, &path).await {
            Ok(bytes) => {
                debug!(session = %self.session, page = seq, bytes, "page downloaded");
                let _ = self.tx.send(SessionMessage::PageCaptured {
                    session: self.session,
                    path,
                    declared_height: page.image_height,
                });
                Ok(())
            }
            Err(ScanwerkError::Format(reason)) => {
                self.log.record(OpEvent::PageFailed {
                    session: self.session,
                    page: seq,
                    reason,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn download(&self, page: &ReadyPage, path: &Path) -> Result<u64> {
        // Zero means the job description carried no height.
        let height = u16::try_from(page.image_height).ok().filter(|h| *h != 0);

        let transfer = async {
            let chunks = self.device.download_page(&page.binary_url).await?;
            write_repaired(chunks, height, path).await
        };
        match tokio::time::timeout(self.download_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => {
                let _ = tokio::fs::remove_file(path).await;
                Err(ScanwerkError::Transport(format!(
                    "page download exceeded {}s",
                    self.download_timeout.as_secs()
                )))
            }
        }
    }
}
