// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A scriptable in-memory scanner for the end-to-end tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use image::{ImageFormat, RgbImage};
use scanwerk_core::config::{AppConfig, TimingConfig};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::telemetry::{MemoryLog, OpEvent};
use scanwerk_core::types::{
    ChangeToken, DeviceEvent, EventCategory, ResourceRef, WALKUP_DESTINATION_RESOURCE,
    WalkupEventType,
};
use scanwerk_device::PageStream;
use scanwerk_device::api::DeviceApi;
use scanwerk_device::ledm::{
    DestinationEntry, DiscoveryTree, EventTableResponse, JobState, JobStatus, ReadyPage,
    ScanCaps, ScanJobSettings, ScanStatus,
};
use tokio::sync::mpsc;

const DESTINATIONS: &str = "/WalkupScanToComp/WalkupScanToCompDestinations";

/// One scan job as the device will run it.
#[derive(Debug, Clone)]
pub struct FakeJob {
    /// Real line count of each page, in scan order.
    pub heights: Vec<u32>,
    /// End with the user pressing cancel instead of completing.
    pub cancel: bool,
    /// How long the job reports "processing" before the first page is ready.
    pub warm_up: Duration,
}

impl FakeJob {
    pub fn pages(heights: &[u32]) -> Self {
        Self {
            heights: heights.to_vec(),
            cancel: false,
            warm_up: Duration::ZERO,
        }
    }

    pub fn warming_up_for(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }
}

struct RunningJob {
    statuses: Vec<JobStatus>,
    cursor: usize,
    ready_at: Instant,
}

/// In-memory device. Events are pushed by the test and handed out by the
/// event-table long poll; every other resource answers from local state.
pub struct FakeDevice {
    pub adf_loaded: bool,
    destinations: Mutex<Vec<DestinationEntry>>,
    shortcuts: Mutex<HashMap<String, String>>,
    walkups: Mutex<VecDeque<WalkupEventType>>,
    events_tx: mpsc::UnboundedSender<Vec<DeviceEvent>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<DeviceEvent>>>,
    next_token: AtomicU32,
    queued_jobs: Mutex<VecDeque<FakeJob>>,
    jobs: Mutex<HashMap<String, RunningJob>>,
    pages: Mutex<HashMap<String, Vec<u8>>>,
    pub submitted: Mutex<Vec<ScanJobSettings>>,
    discovery_failures: AtomicUsize,
    pub discovery_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            adf_loaded: false,
            destinations: Mutex::new(Vec::new()),
            shortcuts: Mutex::new(HashMap::new()),
            walkups: Mutex::new(VecDeque::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            next_token: AtomicU32::new(1),
            queued_jobs: Mutex::new(VecDeque::new()),
            jobs: Mutex::new(HashMap::new()),
            pages: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            discovery_failures: AtomicUsize::new(0),
            discovery_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` capability probes fail as if the device were off.
    pub fn fail_discovery(&self, n: usize) {
        self.discovery_failures.store(n, Ordering::SeqCst);
    }

    pub fn queue_job(&self, job: FakeJob) {
        self.queued_jobs.lock().expect("jobs").push_back(job);
    }

    /// Resource URI of the registered destination for `profile`.
    pub fn destination_uri(&self, profile: &str) -> String {
        let suffix = format!("({profile})");
        self.destinations
            .lock()
            .expect("destinations")
            .iter()
            .find(|d| d.name.ends_with(&suffix))
            .map(|d| d.resource_uri.clone())
            .expect("destination registered")
    }

    /// A front-panel interaction on `profile`'s destination, with the
    /// shortcut the user picked.
    pub fn push_walkup(&self, profile: &str, kind: WalkupEventType, shortcut: &str) {
        let uri = self.destination_uri(profile);
        self.shortcuts
            .lock()
            .expect("shortcuts")
            .insert(uri.clone(), shortcut.to_string());
        self.walkups.lock().expect("walkups").push_back(kind);
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.push_raw_event(scan_event(&uri, &format!("1-{token}")));
    }

    /// Put a table on the wire as-is.
    pub fn push_raw_event(&self, event: DeviceEvent) {
        self.push_table(vec![event]);
    }

    pub fn push_table(&self, events: Vec<DeviceEvent>) {
        // The receiver lives as long as the device.
        let _ = self.events_tx.send(events);
    }

    fn job_statuses(&self, job_no: usize, job: &FakeJob) -> Vec<JobStatus> {
        let mut statuses = Vec::new();
        let mut pages = self.pages.lock().expect("pages");
        for (i, height) in job.heights.iter().enumerate() {
            let url = format!("/Scan/Jobs/{job_no}/Pages/{}", i + 1);
            pages.insert(url.clone(), jpeg_with_sentinel(40, *height));
            statuses.push(JobStatus {
                state: JobState::Processing,
                ready_page: Some(ReadyPage {
                    page_number: i as u32 + 1,
                    binary_url: url,
                    image_height: *height,
                }),
                canceled_by_device: false,
            });
        }
        statuses.push(JobStatus {
            state: if job.cancel {
                JobState::Canceled
            } else {
                JobState::Completed
            },
            ready_page: None,
            canceled_by_device: job.cancel,
        });
        statuses
    }
}

pub fn scan_event(destination_uri: &str, token: &str) -> DeviceEvent {
    DeviceEvent {
        category: EventCategory::Scan,
        token: ChangeToken::new(token),
        payload: vec![ResourceRef {
            resource_type: WALKUP_DESTINATION_RESOURCE.to_string(),
            uri: destination_uri.to_string(),
        }],
    }
}

#[async_trait]
impl DeviceApi for FakeDevice {
    async fn discovery_tree(&self) -> Result<DiscoveryTree> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .discovery_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ScanwerkError::Transport("connection refused".into()));
        }
        Ok(DiscoveryTree {
            revision: Some("fake".into()),
            resource_types: vec!["wus:WalkupScanToComp".into()],
        })
    }

    async fn list_destinations(&self) -> Result<Vec<DestinationEntry>> {
        Ok(self.destinations.lock().expect("destinations").clone())
    }

    async fn create_destination(&self, display_name: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut destinations = self.destinations.lock().expect("destinations");
        let uri = format!("{DESTINATIONS}/dest-{}", destinations.len() + 1);
        destinations.push(DestinationEntry {
            name: display_name.to_string(),
            hostname: "test-host".into(),
            resource_uri: uri.clone(),
            shortcut: None,
        });
        Ok(uri)
    }

    async fn destination(&self, resource_uri: &str) -> Result<DestinationEntry> {
        let mut entry = self
            .destinations
            .lock()
            .expect("destinations")
            .iter()
            .find(|d| d.resource_uri == resource_uri)
            .cloned()
            .ok_or_else(|| ScanwerkError::Transport(format!("404 {resource_uri}")))?;
        entry.shortcut = self
            .shortcuts
            .lock()
            .expect("shortcuts")
            .get(resource_uri)
            .cloned();
        Ok(entry)
    }

    async fn event_table(&self, etag: Option<&str>) -> Result<EventTableResponse> {
        if etag.is_none() {
            return Ok(EventTableResponse::Changed {
                etag: Some("0".into()),
                events: Vec::new(),
            });
        }
        let mut rx = self.events_rx.lock().await;
        match rx.recv().await {
            Some(events) => Ok(EventTableResponse::Changed {
                etag: Some(format!("t{}", self.next_token.load(Ordering::SeqCst))),
                events,
            }),
            None => std::future::pending().await,
        }
    }

    async fn walkup_event(&self) -> Result<WalkupEventType> {
        self.walkups
            .lock()
            .expect("walkups")
            .pop_front()
            .ok_or_else(|| ScanwerkError::Protocol("no walkup event pending".into()))
    }

    async fn scan_status(&self) -> Result<ScanStatus> {
        Ok(ScanStatus {
            scanner_state: "Idle".into(),
            adf_state: if self.adf_loaded { "Loaded" } else { "Empty" }.into(),
        })
    }

    async fn scan_caps(&self) -> Result<ScanCaps> {
        Ok(ScanCaps {
            model: Some("Fake Jet 1000".into()),
            platen: vec![75, 100, 200, 300, 600],
            adf: vec![75, 100, 200, 300],
        })
    }

    async fn submit_job(&self, settings: &ScanJobSettings) -> Result<String> {
        let job = self
            .queued_jobs
            .lock()
            .expect("jobs")
            .pop_front()
            .ok_or_else(|| ScanwerkError::Transport("no job scripted".into()))?;
        let mut submitted = self.submitted.lock().expect("submitted");
        submitted.push(settings.clone());
        let job_no = submitted.len();
        let url = format!("/Jobs/JobList/{job_no}");
        let statuses = self.job_statuses(job_no, &job);
        let running = RunningJob {
            statuses,
            cursor: 0,
            ready_at: Instant::now() + job.warm_up,
        };
        self.jobs.lock().expect("running").insert(url.clone(), running);
        Ok(url)
    }

    async fn job_status(&self, job_url: &str) -> Result<JobStatus> {
        let mut jobs = self.jobs.lock().expect("running");
        let job = jobs
            .get_mut(job_url)
            .ok_or_else(|| ScanwerkError::Transport(format!("404 {job_url}")))?;
        if Instant::now() < job.ready_at {
            return Ok(JobStatus {
                state: JobState::Processing,
                ready_page: None,
                canceled_by_device: false,
            });
        }
        let status = job.statuses[job.cursor.min(job.statuses.len() - 1)].clone();
        job.cursor += 1;
        Ok(status)
    }

    async fn download_page(&self, binary_url: &str) -> Result<PageStream> {
        let bytes = self
            .pages
            .lock()
            .expect("pages")
            .get(binary_url)
            .cloned()
            .ok_or_else(|| ScanwerkError::Transport(format!("404 {binary_url}")))?;
        let chunks: Vec<Result<Vec<u8>>> = bytes.chunks(512).map(|c| Ok(c.to_vec())).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A baseline JPEG whose frame header carries the 0xFFFF height
/// placeholder the device sends for pages it has not finished measuring.
pub fn jpeg_with_sentinel(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 255) as u8, (y % 255) as u8, 90])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .expect("encode jpeg");
    let sof = bytes
        .windows(2)
        .position(|w| w == [0xFF, 0xC0])
        .expect("baseline frame");
    bytes[sof + 5] = 0xFF;
    bytes[sof + 6] = 0xFF;
    bytes
}

/// Settings for tests: OCR off, fast polling, output under `out`.
pub fn test_config(out: &Path) -> AppConfig {
    let mut config = AppConfig {
        device_url: "http://fake-scanner".into(),
        computer_name: "testhost".into(),
        name_pattern: format!("{}/scan-%H%M%S", out.display()),
        timing: TimingConfig {
            job_poll_interval_ms: 5,
            duplex_window_secs: 60,
            reconnect_delay_secs: 1,
            ..TimingConfig::default()
        },
        ..AppConfig::default()
    };
    for destination in &mut config.destinations {
        destination.ocr = false;
    }
    config
}

/// Poll the log until `pred` holds for some event.
pub async fn wait_for(log: &MemoryLog, timeout: Duration, pred: impl Fn(&OpEvent) -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if log.snapshot().iter().any(&pred) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting; log so far: {:#?}", log.snapshot());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// How many events satisfy `pred`.
pub fn count(log: &MemoryLog, pred: impl Fn(&OpEvent) -> bool) -> usize {
    log.snapshot().iter().filter(|e| pred(e)).count()
}

/// Every regular file under `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("read output dir")
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

/// Page heights of a PDF, converted back to pixels at `dpi`.
pub fn page_heights_px(pdf: &Path, dpi: u32) -> Vec<u32> {
    let doc = lopdf::Document::load(pdf).expect("load pdf");
    doc.get_pages()
        .values()
        .map(|id| {
            let page = doc.get_dictionary(*id).expect("page dict");
            let media_box = page
                .get(b"MediaBox")
                .and_then(|o| o.as_array())
                .expect("media box");
            let number = |o: &lopdf::Object| match o {
                lopdf::Object::Integer(i) => *i as f32,
                lopdf::Object::Real(r) => *r,
                other => panic!("unexpected media box entry {other:?}"),
            };
            let height_pt = number(&media_box[3]) - number(&media_box[1]);
            (height_pt / 72.0 * dpi as f32).round() as u32
        })
        .collect()
}
