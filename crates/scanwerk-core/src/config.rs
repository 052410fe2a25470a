// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ScanwerkError};
use crate::name_pattern::NamePattern;
use crate::types::{ColorSpace, DestinationProfile, ScanProfile};

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the device, e.g. `http://192.168.1.20:8080`.
    pub device_url: String,
    /// Prefix of every display name registered on the device.
    pub computer_name: String,
    /// Default output path pattern for destinations without their own.
    pub name_pattern: String,
    pub destinations: Vec<DestinationProfile>,
    pub timing: TimingConfig,
    pub ocr: OcrConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_url: String::new(),
            computer_name: default_computer_name(),
            name_pattern: "./%Y%m%d-%H%M%S".to_string(),
            destinations: default_destinations(),
            timing: TimingConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            ScanwerkError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        info!(path = %path.display(), destinations = config.destinations.len(), "configuration loaded");
        Ok(config)
    }

    /// Write settings as pretty-printed JSON, creating the parent directory.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(ScanwerkError::Config("no destinations configured".into()));
        }
        NamePattern::parse(&self.name_pattern)?;

        let mut seen = HashSet::new();
        for dest in &self.destinations {
            if dest.name.trim().is_empty() {
                return Err(ScanwerkError::Config("destination with empty name".into()));
            }
            if !seen.insert(dest.name.as_str()) {
                return Err(ScanwerkError::Config(format!(
                    "destination {:?} configured twice",
                    dest.name
                )));
            }
            if let Some(pattern) = &dest.output_pattern {
                NamePattern::parse(pattern)?;
            }
            for profile in [&dest.document, &dest.photo] {
                if profile.resolution == 0 || profile.adf_resolution == Some(0) {
                    return Err(ScanwerkError::Config(format!(
                        "destination {:?} has a zero resolution",
                        dest.name
                    )));
                }
            }
        }

        if self.ocr.workers == 0 {
            return Err(ScanwerkError::Config("ocr.workers must be at least 1".into()));
        }
        self.timing.validate()?;
        if self.device_url.is_empty() {
            warn!("no device_url configured");
        }
        Ok(())
    }

    /// Output pattern in effect for a destination.
    pub fn pattern_for<'a>(&'a self, dest: &'a DestinationProfile) -> &'a str {
        dest.output_pattern.as_deref().unwrap_or(&self.name_pattern)
    }
}

fn default_computer_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "scanwerk".to_string())
}

/// "Normal" and "LowRes", matching what most users expect on the panel.
fn default_destinations() -> Vec<DestinationProfile> {
    let normal = DestinationProfile {
        name: "Normal".to_string(),
        output_pattern: None,
        ocr: false,
        duplex: true,
        document: ScanProfile {
            adf_resolution: Some(200),
            ..ScanProfile::with_resolution(300, ColorSpace::Gray)
        },
        photo: ScanProfile::with_resolution(200, ColorSpace::Color),
    };
    let low_res = DestinationProfile {
        name: "LowRes".to_string(),
        output_pattern: None,
        ocr: false,
        duplex: true,
        document: ScanProfile::with_resolution(75, ColorSpace::Gray),
        photo: ScanProfile::with_resolution(75, ColorSpace::Color),
    };
    vec![normal, low_res]
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Timeouts and intervals, all in seconds on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Long-poll timeout sent to the event table.
    pub event_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Bound on ordinary (non long-poll) device requests.
    pub request_timeout_secs: u64,
    pub job_poll_interval_ms: u64,
    /// How long a recto waits for its verso.
    pub duplex_window_secs: u64,
    pub reregister_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub page_download_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            event_timeout_secs: 120,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            job_poll_interval_ms: 1000,
            duplex_window_secs: 60,
            reregister_interval_secs: 60 * 60,
            reconnect_delay_secs: 120,
            page_download_timeout_secs: 300,
        }
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<()> {
        let fields = [
            ("event_timeout_secs", self.event_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("job_poll_interval_ms", self.job_poll_interval_ms),
            ("duplex_window_secs", self.duplex_window_secs),
            ("reregister_interval_secs", self.reregister_interval_secs),
            ("reconnect_delay_secs", self.reconnect_delay_secs),
            ("page_download_timeout_secs", self.page_download_timeout_secs),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ScanwerkError::Config(format!("timing.{name} must be > 0"))),
            None => Ok(()),
        }
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_secs(self.event_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn duplex_window(&self) -> Duration {
        Duration::from_secs(self.duplex_window_secs)
    }

    pub fn reregister_interval(&self) -> Duration {
        Duration::from_secs(self.reregister_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn page_download_timeout(&self) -> Duration {
        Duration::from_secs(self.page_download_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// OCR
// ---------------------------------------------------------------------------

/// How OCR page PDFs are joined into one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatTool {
    Pdfunite,
    Pdftk,
    /// In-process page merge.
    Builtin,
}

impl ConcatTool {
    /// External program, if any.
    pub fn program(&self) -> Option<&'static str> {
        match self {
            Self::Pdfunite => Some("pdfunite"),
            Self::Pdftk => Some("pdftk"),
            Self::Builtin => None,
        }
    }
}

/// External OCR chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language code.
    pub language: String,
    pub workers: usize,
    pub step_timeout_secs: u64,
    pub deskew_program: String,
    pub ocr_program: String,
    pub hocr2pdf_program: String,
    pub concat_tool: ConcatTool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            workers: 2,
            step_timeout_secs: 60,
            deskew_program: "convert".to_string(),
            ocr_program: "tesseract".to_string(),
            hocr2pdf_program: "hocr2pdf".to_string(),
            concat_tool: ConcatTool::Builtin,
        }
    }
}

impl OcrConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs.max(1))
    }

    /// Every external program the OCR chain needs.
    pub fn required_programs(&self) -> Vec<&str> {
        let mut programs = vec![
            self.deskew_program.as_str(),
            self.ocr_program.as_str(),
            self.hocr2pdf_program.as_str(),
        ];
        programs.extend(self.concat_tool.program());
        programs
    }
}
