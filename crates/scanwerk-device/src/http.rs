// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `DeviceApi` over HTTP with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH, LOCATION};
use reqwest::{Client, Response, StatusCode};
use scanwerk_core::config::TimingConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::WalkupEventType;
use tracing::{debug, instrument};

use crate::api::{DeviceApi, PageStream};
use crate::ledm::{
    self, DESTINATIONS_PATH, DISCOVERY_TREE_PATH, DestinationEntry, DiscoveryTree,
    EVENT_TABLE_PATH, EventTableResponse, JobStatus, SCAN_CAPS_PATH, SCAN_JOBS_PATH,
    SCAN_STATUS_PATH, ScanCaps, ScanJobSettings, ScanStatus, WALKUP_EVENT_PATH,
};

/// Client for one device, e.g. `http://192.168.1.20:8080`.
#[derive(Debug, Clone)]
pub struct HttpDevice {
    base: String,
    http: Client,
    request_timeout: Duration,
    /// How long the device may hold an event-table request open.
    event_timeout: Duration,
    download_timeout: Duration,
}

impl HttpDevice {
    pub fn new(base_url: &str, timing: &TimingConfig) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ScanwerkError::Config(format!(
                "device URL must start with http:// or https://, got {base_url:?}"
            )));
        }

        let http = Client::builder()
            .connect_timeout(timing.connect_timeout())
            .user_agent(concat!("scanwerk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScanwerkError::Transport(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base,
            http,
            request_timeout: timing.request_timeout(),
            event_timeout: timing.event_timeout(),
            download_timeout: timing.page_download_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Resolve a device path (or an absolute URL the device handed us).
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    async fn get_xml(&self, path: &str, op: &str) -> Result<String> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport(op, e))?;
        let response = expect_status(response, StatusCode::OK, op).await?;
        response.text().await.map_err(|e| transport(op, e))
    }

    /// POST an XML body; returns the `Location` of the created resource.
    async fn post_xml(&self, path: &str, body: String, op: &str) -> Result<String> {
        let response = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| transport(op, e))?;
        let response = expect_status(response, StatusCode::CREATED, op).await?;
        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ScanwerkError::Protocol(format!("{op}: 201 without Location header")))
    }
}

#[async_trait]
impl DeviceApi for HttpDevice {
    async fn discovery_tree(&self) -> Result<DiscoveryTree> {
        let xml = self.get_xml(DISCOVERY_TREE_PATH, "discovery tree").await?;
        ledm::parse_discovery_tree(&xml)
    }

    async fn list_destinations(&self) -> Result<Vec<DestinationEntry>> {
        let xml = self.get_xml(DESTINATIONS_PATH, "list destinations").await?;
        ledm::parse_destinations(&xml)
    }

    #[instrument(skip(self), fields(device = %self.base))]
    async fn create_destination(&self, display_name: &str) -> Result<String> {
        self.post_xml(
            DESTINATIONS_PATH,
            ledm::destination_body(display_name),
            "register destination",
        )
        .await
    }

    async fn destination(&self, resource_uri: &str) -> Result<DestinationEntry> {
        let xml = self.get_xml(resource_uri, "read destination").await?;
        ledm::parse_destination(&xml)
    }

    async fn event_table(&self, etag: Option<&str>) -> Result<EventTableResponse> {
        let op = "event table";
        let request = match etag {
            // First read returns immediately and hands us the current tag.
            None => self
                .http
                .get(self.url(EVENT_TABLE_PATH))
                .timeout(self.request_timeout),
            // The device counts the timeout parameter in tenths of a second.
            Some(tag) => self
                .http
                .get(self.url(&format!(
                    "{EVENT_TABLE_PATH}?timeout={}",
                    self.event_timeout.as_secs() * 10
                )))
                .header(IF_NONE_MATCH, tag)
                .timeout(self.event_timeout + self.request_timeout),
        };

        let response = request.send().await.map_err(|e| transport(op, e))?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(EventTableResponse::NotModified);
        }
        let response = expect_status(response, StatusCode::OK, op).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let xml = response.text().await.map_err(|e| transport(op, e))?;
        let events = ledm::parse_event_table(&xml)?;
        debug!(events = events.len(), etag = ?etag, "event table changed");
        Ok(EventTableResponse::Changed { etag, events })
    }

    async fn walkup_event(&self) -> Result<WalkupEventType> {
        let xml = self.get_xml(WALKUP_EVENT_PATH, "walkup event").await?;
        ledm::parse_walkup_event(&xml)
    }

    async fn scan_status(&self) -> Result<ScanStatus> {
        let xml = self.get_xml(SCAN_STATUS_PATH, "scan status").await?;
        ledm::parse_scan_status(&xml)
    }

    async fn scan_caps(&self) -> Result<ScanCaps> {
        let xml = self.get_xml(SCAN_CAPS_PATH, "scan capabilities").await?;
        ledm::parse_scan_caps(&xml)
    }

    #[instrument(skip(self, settings), fields(device = %self.base, resolution = settings.resolution))]
    async fn submit_job(&self, settings: &ScanJobSettings) -> Result<String> {
        self.post_xml(
            SCAN_JOBS_PATH,
            ledm::scan_settings_body(settings),
            "submit scan job",
        )
        .await
    }

    async fn job_status(&self, job_url: &str) -> Result<JobStatus> {
        let xml = self.get_xml(job_url, "job status").await?;
        ledm::parse_job(&xml)
    }

    async fn download_page(&self, binary_url: &str) -> Result<PageStream> {
        let op = "page download";
        let response = self
            .http
            .get(self.url(binary_url))
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| transport(op, e))?;
        let response = expect_status(response, StatusCode::OK, op).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| transport("page download", e))
            })
            .boxed())
    }
}

fn transport(op: &str, err: reqwest::Error) -> ScanwerkError {
    ScanwerkError::Transport(format!("{op}: {err}"))
}

async fn expect_status(response: Response, expected: StatusCode, op: &str) -> Result<Response> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ScanwerkError::Transport(format!(
        "{op}: unexpected status {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}
