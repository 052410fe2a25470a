// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document assembly: turn finished sessions into output files and release
// their temporary directories.
//
// Assemblies run one at a time on a dedicated task, in the order they were
// queued, so a session that finishes while a pair is being written simply
// waits its turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::name_pattern::NamePattern;
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use scanwerk_core::types::DocumentKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::duplex::{Assembly, interleave};
use crate::finished::{CapturedPage, FinishedSession};
use crate::hocr;
use crate::pdf::{PdfMerger, PdfWriter};
use crate::pipeline::{OcrArtifacts, PageOutcome};

/// Writes final documents.
pub struct DocumentAssembler {
    merger: PdfMerger,
    log: Arc<dyn OperationalLog>,
}

/// Where a page's content comes from once OCR has settled.
#[derive(Clone)]
struct ReadyPage {
    page: CapturedPage,
    ocr: Option<OcrArtifacts>,
}

impl DocumentAssembler {
    pub fn new(merger: PdfMerger, log: Arc<dyn OperationalLog>) -> Self {
        Self { merger, log }
    }

    /// Start the sequential assembly task.
    pub fn spawn(self) -> AssemblerTask {
        let (tx, mut rx) = mpsc::unbounded_channel::<Assembly<FinishedSession>>();
        let join = tokio::spawn(async move {
            while let Some(assembly) = rx.recv().await {
                // Failures are reported through the log inside `assemble`.
                let _ = self.assemble(assembly).await;
            }
            debug!("assembly queue closed");
        });
        AssemblerTask {
            queue: AssemblyQueue { tx },
            join,
        }
    }

    /// Write the output for one assembly and clean up every session
    /// directory it consumed. Returns the files written.
    #[instrument(skip_all)]
    pub async fn assemble(&self, assembly: Assembly<FinishedSession>) -> Result<Vec<PathBuf>> {
        let (mut sessions, duplex) = match assembly {
            Assembly::Simplex(session) => (vec![session], false),
            Assembly::Duplex { recto, verso } => (vec![recto, verso], true),
        };

        let result = self.write_outputs(&mut sessions, duplex).await;

        for session in sessions {
            let path = session.work_dir.path().to_path_buf();
            if let Err(e) = session.work_dir.close() {
                self.log.record(OpEvent::CleanupFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        }

        match &result {
            Ok(files) => {
                for path in files {
                    debug!(path = %path.display(), "output written");
                }
            }
            Err(e) => self.log.record(OpEvent::AssemblyFailed {
                reason: e.to_string(),
            }),
        }
        result
    }

    async fn write_outputs(
        &self,
        sessions: &mut [FinishedSession],
        duplex: bool,
    ) -> Result<Vec<PathBuf>> {
        // Barrier: nothing from OCR is read before every job has settled.
        let mut ready = Vec::with_capacity(sessions.len());
        for session in sessions.iter_mut() {
            ready.push(settle(session).await);
        }

        let Some(first) = sessions.first() else {
            return Ok(Vec::new());
        };
        let pages: Vec<ReadyPage> = if duplex && ready.len() == 2 {
            interleave(&ready[0], &ready[1])
        } else {
            ready.into_iter().flatten().collect()
        };
        if pages.is_empty() {
            info!(session = %first.id, "session produced no pages, nothing to save");
            return Ok(Vec::new());
        }

        let pattern = NamePattern::parse(&first.destination.output_pattern)?;
        let base = pattern.expand(first.started_at.naive_local());
        if let Some(parent) = base.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ScanwerkError::Resource(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let files = match first.kind {
            DocumentKind::Photo => write_images(&pages, &base).await?,
            DocumentKind::Document => {
                let title = first.destination.display_name.clone();
                self.write_pdf(&pages, &base, first.resolution, title).await?
            }
        };

        if let Some(main) = files.first() {
            self.log.record(OpEvent::DocumentSaved {
                path: main.clone(),
                pages: pages.len(),
                duplex,
            });
        }
        Ok(files)
    }

    async fn write_pdf(
        &self,
        pages: &[ReadyPage],
        base: &Path,
        dpi: u32,
        title: String,
    ) -> Result<Vec<PathBuf>> {
        let output = unique_path(base, "pdf");
        let ocr: Option<Vec<&OcrArtifacts>> = pages.iter().map(|p| p.ocr.as_ref()).collect();

        if let Some(artifacts) = ocr {
            let page_pdfs: Vec<PathBuf> = artifacts.iter().map(|a| a.page_pdf.clone()).collect();
            match self.merger.concat(&page_pdfs, &output).await {
                Ok(()) => {
                    let mut files = vec![output.clone()];
                    match write_text_index(&artifacts, &output.with_extension("txt")).await {
                        Ok(index) => files.push(index),
                        Err(e) => warn!(error = %e, "text index not written"),
                    }
                    return Ok(files);
                }
                Err(e) => {
                    warn!(error = %e, "OCR page concatenation failed, rendering images instead");
                }
            }
        }

        let images: Vec<PathBuf> = pages.iter().map(|p| p.page.path.clone()).collect();
        let target = output.clone();
        tokio::task::spawn_blocking(move || {
            let mut writer = PdfWriter::new(dpi);
            writer.set_title(title);
            writer.write_pages(&images, &target)
        })
        .await
            .map_err(|e| ScanwerkError::Pdf(format!("render task failed: {e}")))??;
        Ok(vec![output])
    }
}

/// Handle to the running assembly task.
pub struct AssemblerTask {
    queue: AssemblyQueue,
    join: JoinHandle<()>,
}

impl AssemblerTask {
    pub fn queue(&self) -> AssemblyQueue {
        self.queue.clone()
    }

    /// Close our end of the queue and wait until everything queued so far
    /// (by any clone still alive) has been written.
    pub async fn finish(self) {
        drop(self.queue);
        if let Err(e) = self.join.await {
            warn!(error = %e, "assembly task ended abnormally");
        }
    }
}

/// Cloneable sender side of the assembly queue.
#[derive(Debug, Clone)]
pub struct AssemblyQueue {
    tx: mpsc::UnboundedSender<Assembly<FinishedSession>>,
}

impl AssemblyQueue {
    pub fn submit(&self, assembly: Assembly<FinishedSession>) -> Result<()> {
        self.tx
            .send(assembly)
            .map_err(|_| ScanwerkError::Resource("assembly task has stopped".into()))
    }
}

/// Wait for a session's OCR jobs and pair each page with its artefacts.
async fn settle(session: &mut FinishedSession) -> Vec<ReadyPage> {
    let outcomes: Vec<PageOutcome> = match session.ocr.as_mut() {
        Some(batch) => batch.await_all().await,
        None => Vec::new(),
    };
    session
        .pages
        .iter()
        .map(|page| ReadyPage {
            page: page.clone(),
            ocr: outcomes
                .iter()
                .find(|o| o.index == page.index)
                .and_then(|o| o.result.as_ref().ok().cloned()),
        })
        .collect()
}

async fn write_images(pages: &[ReadyPage], base: &Path) -> Result<Vec<PathBuf>> {
    let targets: Vec<PathBuf> = if pages.len() == 1 {
        vec![unique_path(base, "jpg")]
    } else {
        (1..=pages.len())
            .map(|n| unique_path(&numbered(base, n), "jpg"))
            .collect()
    };
    for (page, target) in pages.iter().zip(&targets) {
        tokio::fs::copy(&page.page.path, target).await.map_err(|e| {
            ScanwerkError::Resource(format!("cannot write {}: {e}", target.display()))
        })?;
    }
    Ok(targets)
}

async fn write_text_index(artifacts: &[&OcrArtifacts], path: &Path) -> Result<PathBuf> {
    let mut text = String::new();
    for artifact in artifacts {
        match hocr::extract_text_from_file(&artifact.hocr) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push_str("\n\n");
            }
            Err(e) => warn!(hocr = %artifact.hocr.display(), error = %e, "page skipped in text index"),
        }
    }
    tokio::fs::write(path, text.trim_end()).await.map_err(|e| {
        ScanwerkError::Resource(format!("cannot write {}: {e}", path.display()))
    })?;
    Ok(path.to_path_buf())
}

/// `<base>-NNNN`
fn numbered(base: &Path, n: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("-{n:04}"));
    PathBuf::from(name)
}

/// `<base>.<ext>`, or `<base>_2.<ext>` and so on if that already exists.
fn unique_path(base: &Path, ext: &str) -> PathBuf {
    let with_ext = |suffix: &str| {
        let mut name = base.as_os_str().to_owned();
        name.push(suffix);
        name.push(".");
        name.push(ext);
        PathBuf::from(name)
    };
    let mut candidate = with_ext("");
    let mut n = 2;
    while candidate.exists() {
        candidate = with_ext(&format!("_{n}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finished::SessionEnd;
    use chrono::{Local, TimeZone};
    use image::{ImageFormat, RgbImage};
    use scanwerk_core::config::ConcatTool;
    use scanwerk_core::telemetry::MemoryLog;
    use crate::pipeline::{PageJob, PipelineWorkerPool, WorkerConfig};
    use scanwerk_core::types::{Destination, DestinationId, DestinationProfile, ScanProfile, SessionId};
    use std::time::Duration;

    fn destination(out: &Path) -> Arc<Destination> {
        Arc::new(Destination {
            profile: DestinationProfile {
                name: "Normal".into(),
                output_pattern: None,
                ocr: false,
                duplex: true,
                document: ScanProfile::default(),
                photo: ScanProfile::default(),
            },
            display_name: "host(Normal)".into(),
            output_pattern: format!("{}/%Y/scan-%H%M%S", out.display()),
            id: DestinationId("d1".into()),
            resource_uri: "/WalkupScanToComp/WalkupScanToCompDestinations/d1".into(),
        })
    }

    /// A session whose page `i` is a solid image of width `10 + i`.
    fn session(dest: &Arc<Destination>, kind: DocumentKind, widths: &[u32]) -> FinishedSession {
        let work_dir = tempfile::tempdir().expect("tempdir");
        let pages = widths
            .iter()
            .enumerate()
            .map(|(index, width)| {
                let path = work_dir.path().join(format!("page-{index:04}.jpg"));
                RgbImage::from_pixel(*width, 20, image::Rgb([200, 200, 200]))
                    .save_with_format(&path, ImageFormat::Jpeg)
                    .expect("write page");
                CapturedPage {
                    index,
                    path,
                    declared_height: 20,
                }
            })
            .collect();
        FinishedSession {
            id: SessionId::new(),
            destination: Arc::clone(dest),
            kind,
            resolution: 100,
            started_at: Local
                .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
                .single()
                .expect("unambiguous local time"),
            pages,
            ocr: None,
            work_dir,
            end: SessionEnd::Completed,
        }
    }

    fn assembler(log: Arc<MemoryLog>) -> DocumentAssembler {
        DocumentAssembler::new(
            PdfMerger::new(ConcatTool::Builtin, Duration::from_secs(30)),
            log,
        )
    }

    #[tokio::test]
    async fn simplex_document_is_one_pdf() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let log = Arc::new(MemoryLog::new());
        let s = session(&dest, DocumentKind::Document, &[30, 31]);
        let work = s.work_dir.path().to_path_buf();

        let files = assembler(log.clone())
            .assemble(Assembly::Simplex(s))
            .await
            .expect("assemble");

        assert_eq!(files, vec![out.path().join("2024/scan-070809.pdf")]);
        assert_eq!(crate::pdf::page_count(&files[0]).expect("pdf"), 2);
        assert!(!work.exists(), "temp dir removed");
        assert!(log
            .snapshot()
            .iter()
            .any(|e| matches!(e, OpEvent::DocumentSaved { pages: 2, duplex: false, .. })));
    }

    #[tokio::test]
    async fn duplex_interleaves_and_cleans_both() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let recto = session(&dest, DocumentKind::Document, &[10, 11]);
        let verso = session(&dest, DocumentKind::Document, &[20, 21]);
        let dirs = [
            recto.work_dir.path().to_path_buf(),
            verso.work_dir.path().to_path_buf(),
        ];

        let files = assembler(Arc::new(MemoryLog::new()))
            .assemble(Assembly::Duplex { recto, verso })
            .await
            .expect("assemble");

        let doc = lopdf::Document::load(&files[0]).expect("pdf");
        assert_eq!(doc.get_pages().len(), 4);
        assert!(dirs.iter().all(|d| !d.exists()));
    }

    #[tokio::test]
    async fn photos_become_numbered_jpegs() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let s = session(&dest, DocumentKind::Photo, &[10, 10, 10]);
        let files = assembler(Arc::new(MemoryLog::new()))
            .assemble(Assembly::Simplex(s))
            .await
            .expect("assemble");
        let names: Vec<String> = files
            .iter()
            .filter_map(|f| f.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec!["scan-070809-0001.jpg", "scan-070809-0002.jpg", "scan-070809-0003.jpg"]
        );
    }

    #[tokio::test]
    async fn existing_output_is_not_overwritten() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let a = assembler(Arc::new(MemoryLog::new()));
        let first = a
            .assemble(Assembly::Simplex(session(&dest, DocumentKind::Photo, &[10])))
            .await
            .expect("first");
        let second = a
            .assemble(Assembly::Simplex(session(&dest, DocumentKind::Photo, &[10])))
            .await
            .expect("second");
        assert_ne!(first, second);
        assert!(second[0].to_string_lossy().ends_with("scan-070809_2.jpg"));
    }

    #[tokio::test]
    async fn empty_session_only_cleans_up() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let s = session(&dest, DocumentKind::Document, &[]);
        let work = s.work_dir.path().to_path_buf();
        let files = assembler(Arc::new(MemoryLog::new()))
            .assemble(Assembly::Simplex(s))
            .await
            .expect("nothing to do");
        assert!(files.is_empty());
        assert!(!work.exists());
    }

    #[tokio::test]
    async fn failure_still_cleans_up() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let s = session(&dest, DocumentKind::Document, &[10]);
        std::fs::write(&s.pages[0].path, b"corrupt").expect("clobber page");
        let work = s.work_dir.path().to_path_buf();
        let log = Arc::new(MemoryLog::new());

        let err = assembler(log.clone())
            .assemble(Assembly::Simplex(s))
            .await
            .expect_err("undecodable page");
        assert!(matches!(err, ScanwerkError::Image(_)));
        assert!(!work.exists());
        assert!(log
            .snapshot()
            .iter()
            .any(|e| matches!(e, OpEvent::AssemblyFailed { .. })));
    }

    #[tokio::test]
    async fn queued_assemblies_run_in_order() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let log = Arc::new(MemoryLog::new());
        let task = assembler(log.clone()).spawn();
        let queue = task.queue();
        queue
            .submit(Assembly::Simplex(session(&dest, DocumentKind::Photo, &[10])))
            .expect("submit");
        queue
            .submit(Assembly::Simplex(session(&dest, DocumentKind::Photo, &[10])))
            .expect("submit");
        drop(queue);
        task.finish().await;

        let saved: Vec<PathBuf> = log
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                OpEvent::DocumentSaved { path, .. } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(saved.len(), 2);
        assert!(saved[1].to_string_lossy().ends_with("_2.jpg"));
    }

    #[tokio::test]
    async fn image_pdf_carries_destination_title() {
        let out = tempfile::tempdir().expect("out");
        let dest = destination(out.path());
        let files = assembler(Arc::new(MemoryLog::new()))
            .assemble(Assembly::Simplex(session(&dest, DocumentKind::Document, &[10])))
            .await
            .expect("assemble");

        let doc = lopdf::Document::load(&files[0]).expect("pdf");
        let info = doc
            .trailer
            .get(b"Info")
            .and_then(|o| o.as_reference())
            .and_then(|id| doc.get_dictionary(id))
            .expect("info dictionary");
        let title = info.get(b"Title").and_then(|t| t.as_str()).expect("title");
        assert_eq!(title, b"host(Normal)");
    }

    /// Stand-in OCR tools. Each page's hOCR holds the word from the
    /// `<page>.label` file next to the source image, and every page PDF is a
    /// copy of a real one-page PDF. Pages labelled `broken` fail in OCR.
    fn ocr_pool(tools: &Path) -> PipelineWorkerPool {
        let template = tools.join("page.pdf");
        let blank = tools.join("blank.jpg");
        RgbImage::from_pixel(10, 10, image::Rgb([255, 255, 255]))
            .save_with_format(&blank, ImageFormat::Jpeg)
            .expect("blank page");
        PdfWriter::new(100)
            .write_pages(&[blank], &template)
            .expect("template pdf");

        let tool = |name: &str, body: String| {
            let path = tools.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write tool");
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                    .expect("chmod");
            }
            path.display().to_string()
        };
        let config = WorkerConfig {
            worker_count: 2,
            step_timeout: Duration::from_secs(5),
            language: "eng".into(),
            deskew_program: tool(
                "fake-convert",
                r#"for last; do :; done; cp "$1" "$last"; cp "$1.label" "$last.label""#.into(),
            ),
            ocr_program: tool(
                "fake-tesseract",
                concat!(
                    r#"label=$(cat "$1.label"); [ "$label" = broken ] && exit 1; "#,
                    r#"echo "<html><body><p class='ocr_par'>$label</p></body></html>" > "$2.hocr""#
                )
                .into(),
            ),
            hocr2pdf_program: tool(
                "fake-hocr2pdf",
                format!(r#"cat > /dev/null; cp "{}" "$4""#, template.display()),
            ),
        };
        PipelineWorkerPool::start(config, Arc::new(MemoryLog::new()))
    }

    /// A document session whose pages carry `labels` and are queued for OCR.
    fn ocr_session(
        dest: &Arc<Destination>,
        pool: &PipelineWorkerPool,
        labels: &[&str],
    ) -> FinishedSession {
        let widths = vec![10; labels.len()];
        let mut s = session(dest, DocumentKind::Document, &widths);
        let mut batch = pool.batch();
        for (page, label) in s.pages.iter().zip(labels) {
            let mut marker = page.path.clone().into_os_string();
            marker.push(".label");
            std::fs::write(&marker, label).expect("write label");
            batch.submit(PageJob::new(
                page.index,
                page.path.clone(),
                page.declared_height,
                s.work_dir.path(),
            ));
        }
        s.ocr = Some(batch);
        s
    }

    #[tokio::test]
    async fn ocr_pages_are_merged_with_text_index_in_page_order() {
        let out = tempfile::tempdir().expect("out");
        let tools = tempfile::tempdir().expect("tools");
        let dest = destination(out.path());
        let pool = ocr_pool(tools.path());
        let recto = ocr_session(&dest, &pool, &["front1", "front2"]);
        let verso = ocr_session(&dest, &pool, &["back2", "back1"]);

        let files = assembler(Arc::new(MemoryLog::new()))
            .assemble(Assembly::Duplex { recto, verso })
            .await
            .expect("assemble");

        let pdf = out.path().join("2024/scan-070809.pdf");
        assert_eq!(files, vec![pdf.clone(), pdf.with_extension("txt")]);
        assert_eq!(crate::pdf::page_count(&pdf).expect("pdf"), 4);
        let text = std::fs::read_to_string(&files[1]).expect("text index");
        assert_eq!(text, "front1\n\nback1\n\nfront2\n\nback2");
    }

    #[tokio::test]
    async fn failed_ocr_page_renders_images_instead() {
        let out = tempfile::tempdir().expect("out");
        let tools = tempfile::tempdir().expect("tools");
        let dest = destination(out.path());
        let pool = ocr_pool(tools.path());
        let s = ocr_session(&dest, &pool, &["one", "broken", "three"]);
        let log = Arc::new(MemoryLog::new());

        let files = assembler(log.clone())
            .assemble(Assembly::Simplex(s))
            .await
            .expect("assemble");

        assert_eq!(files, vec![out.path().join("2024/scan-070809.pdf")]);
        // No text index once the OCR pages are abandoned.
        assert!(!out.path().join("2024/scan-070809.txt").exists());
        let doc = lopdf::Document::load(&files[0]).expect("pdf");
        assert_eq!(doc.get_pages().len(), 3);
        assert!(log
            .snapshot()
            .iter()
            .any(|e| matches!(e, OpEvent::DocumentSaved { pages: 3, .. })));
    }

    #[test]
    fn numbered_suffix() {
        assert_eq!(
            numbered(Path::new("/a/scan"), 7),
            PathBuf::from("/a/scan-0007")
        );
    }
}
