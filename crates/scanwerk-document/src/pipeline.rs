// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page post-processing worker pool.
//
// A fixed set of workers pulls page jobs off a shared queue and runs the
// external OCR chain (deskew, OCR to hOCR, hOCR to page PDF) on each one.
// Sessions submit through a `PageBatch` and call `await_all` before reading
// any OCR artefact.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scanwerk_core::config::OcrConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::process::ProcessStep;

/// Pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub step_timeout: Duration,
    pub language: String,
    pub deskew_program: String,
    pub ocr_program: String,
    pub hocr2pdf_program: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&OcrConfig::default())
    }
}

impl From<&OcrConfig> for WorkerConfig {
    fn from(ocr: &OcrConfig) -> Self {
        Self {
            worker_count: ocr.workers.max(1),
            step_timeout: ocr.step_timeout(),
            language: ocr.language.clone(),
            deskew_program: ocr.deskew_program.clone(),
            ocr_program: ocr.ocr_program.clone(),
            hocr2pdf_program: ocr.hocr2pdf_program.clone(),
        }
    }
}

/// One downloaded, repaired page awaiting OCR.
#[derive(Debug, Clone)]
pub struct PageJob {
    /// Zero-based position in the session.
    pub index: usize,
    /// Repaired JPEG as downloaded.
    pub source: PathBuf,
    /// Height the device declared for this page.
    pub declared_height: u32,
    /// Deskewed image handed to the OCR engine.
    pub ocr_image: PathBuf,
    /// Base path given to tesseract; it appends `.hocr`.
    pub ocr_base: PathBuf,
    pub page_pdf: PathBuf,
}

impl PageJob {
    /// Lay out artefact paths for page `index` inside `work_dir`.
    pub fn new(index: usize, source: PathBuf, declared_height: u32, work_dir: &Path) -> Self {
        let stem = format!("ocr-{index:04}");
        Self {
            index,
            source,
            declared_height,
            ocr_image: work_dir.join(format!("{stem}.jpg")),
            ocr_base: work_dir.join(&stem),
            page_pdf: work_dir.join(format!("{stem}.pdf")),
        }
    }

    pub fn hocr_path(&self) -> PathBuf {
        self.ocr_base.with_extension("hocr")
    }

    /// The three external steps, in order.
    pub fn steps(&self, config: &WorkerConfig) -> [ProcessStep; 3] {
        let limit = config.step_timeout;
        let hocr = self.hocr_path();
        [
            ProcessStep::new("deskew", &config.deskew_program, limit)
                .path_arg(&self.source)
                .arg("-background")
                .arg("white")
                .arg("-fuzz")
                .arg("75%")
                .arg("-deskew")
                .arg("50%")
                .path_arg(&self.ocr_image)
                .produces(&self.ocr_image),
            ProcessStep::new("ocr", &config.ocr_program, limit)
                .path_arg(&self.ocr_image)
                .path_arg(&self.ocr_base)
                .arg("-l")
                .arg(&config.language)
                .arg("hocr")
                .produces(&hocr),
            ProcessStep::new("page-pdf", &config.hocr2pdf_program, limit)
                .arg("-i")
                .path_arg(&self.ocr_image)
                .arg("-o")
                .path_arg(&self.page_pdf)
                .stdin_from(hocr)
                .produces(&self.page_pdf),
        ]
    }
}

/// Artefacts of a page whose OCR chain succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrArtifacts {
    pub page_pdf: PathBuf,
    pub hocr: PathBuf,
}

/// Result of one page job.
#[derive(Debug)]
pub struct PageOutcome {
    pub index: usize,
    pub source: PathBuf,
    pub result: Result<OcrArtifacts>,
}

impl PageOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
struct Queued {
    job: PageJob,
    reply: oneshot::Sender<PageOutcome>,
}

/// Fixed-size pool of OCR workers.
///
/// Cloning is cheap; all clones feed the same workers. Workers stop once
/// every clone (and every batch) has been dropped.
#[derive(Debug, Clone)]
pub struct PipelineWorkerPool {
    tx: mpsc::UnboundedSender<Queued>,
}

impl PipelineWorkerPool {
    /// Spawn `config.worker_count` workers on the current runtime.
    pub fn start(config: WorkerConfig, log: Arc<dyn OperationalLog>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Queued>();
        let rx = Arc::new(Mutex::new(rx));
        let config = Arc::new(config);

        for id in 0..config.worker_count {
            let rx = Arc::clone(&rx);
            let config = Arc::clone(&config);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                Self::worker_loop(id, rx, config, log).await;
            });
        }

        info!(workers = config.worker_count, "started page workers");
        Self { tx }
    }

    /// Open a batch for one session.
    pub fn batch(&self) -> PageBatch {
        PageBatch {
            tx: self.tx.clone(),
            pending: Vec::new(),
        }
    }

    async fn worker_loop(
        id: usize,
        rx: Arc<Mutex<mpsc::UnboundedReceiver<Queued>>>,
        config: Arc<WorkerConfig>,
        log: Arc<dyn OperationalLog>,
    ) {
        loop {
            // Hold the lock only while waiting for the next job.
            let next = rx.lock().await.recv().await;
            let Some(Queued { job, reply }) = next else {
                debug!(worker = id, "page worker stopping");
                break;
            };

            debug!(worker = id, page = job.index, "processing page");
            let result = run_chain(&job, &config).await;
            if let Err(ScanwerkError::PipelineStep { step, detail }) = &result {
                log.record(OpEvent::StepFailed {
                    input: job.source.clone(),
                    step: step.clone(),
                    reason: detail.clone(),
                });
            }

            let outcome = PageOutcome {
                index: job.index,
                source: job.source,
                result,
            };
            if reply.send(outcome).is_err() {
                warn!(worker = id, "page batch dropped before its result arrived");
            }
        }
    }
}

async fn run_chain(job: &PageJob, config: &WorkerConfig) -> Result<OcrArtifacts> {
    for step in job.steps(config) {
        step.run().await?;
    }
    Ok(OcrArtifacts {
        page_pdf: job.page_pdf.clone(),
        hocr: job.hocr_path(),
    })
}

/// Jobs submitted by one session.
#[derive(Debug)]
pub struct PageBatch {
    tx: mpsc::UnboundedSender<Queued>,
    pending: Vec<(usize, PathBuf, oneshot::Receiver<PageOutcome>)>,
}

impl PageBatch {
    pub fn submit(&mut self, job: PageJob) {
        let (reply, rx) = oneshot::channel();
        let index = job.index;
        let source = job.source.clone();
        if let Err(mpsc::error::SendError(queued)) = self.tx.send(Queued { job, reply }) {
            // Pool is gone; resolve immediately so `await_all` still returns.
            let _ = queued.reply.send(PageOutcome {
                index,
                source: source.clone(),
                result: Err(ScanwerkError::step("queue", "worker pool has shut down")),
            });
        }
        self.pending.push((index, source, rx));
    }

    /// Number of jobs submitted since the last `await_all`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every job submitted so far, returning outcomes in submit order.
    pub async fn await_all(&mut self) -> Vec<PageOutcome> {
        let pending = std::mem::take(&mut self.pending);
        let mut outcomes = Vec::with_capacity(pending.len());
        for (index, source, rx) in pending {
            let outcome = rx.await.unwrap_or_else(|_| PageOutcome {
                index,
                source,
                result: Err(ScanwerkError::step("queue", "worker exited without a result")),
            });
            outcomes.push(outcome);
        }
        outcomes
    }
}
