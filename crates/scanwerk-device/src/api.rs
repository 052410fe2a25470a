// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The device seam. Everything above this trait talks to the scanner through
// it; `HttpDevice` is the real implementation, tests plug in a fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use scanwerk_core::error::Result;
use scanwerk_core::types::WalkupEventType;

use crate::ledm::{
    DestinationEntry, DiscoveryTree, EventTableResponse, JobStatus, ScanCaps, ScanJobSettings,
    ScanStatus,
};

/// Chunks of a page download, in order.
pub type PageStream = BoxStream<'static, Result<Vec<u8>>>;

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Capability probe.
    async fn discovery_tree(&self) -> Result<DiscoveryTree>;

    async fn list_destinations(&self) -> Result<Vec<DestinationEntry>>;

    /// Register a destination; returns the created resource location.
    async fn create_destination(&self, display_name: &str) -> Result<String>;

    /// Read one destination resource (its `Shortcut` names the front-panel
    /// choice).
    async fn destination(&self, resource_uri: &str) -> Result<DestinationEntry>;

    /// Conditional long-poll of the event table. `etag` is the tag returned
    /// by the previous call, `None` on the first call.
    async fn event_table(&self, etag: Option<&str>) -> Result<EventTableResponse>;

    /// Latest front-panel interaction.
    async fn walkup_event(&self) -> Result<WalkupEventType>;

    async fn scan_status(&self) -> Result<ScanStatus>;

    async fn scan_caps(&self) -> Result<ScanCaps>;

    /// Start a scan job; returns the job URL.
    async fn submit_job(&self, settings: &ScanJobSettings) -> Result<String>;

    async fn job_status(&self, job_url: &str) -> Result<JobStatus>;

    /// Stream a page image as the device sends it.
    async fn download_page(&self, binary_url: &str) -> Result<PageStream>;
}
