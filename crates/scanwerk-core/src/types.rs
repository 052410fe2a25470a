// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scan-to-computer client.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ScanwerkError};

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier the device assigned to a registered destination (the trailing
/// segment of the destination's resource URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(pub String);

impl DestinationId {
    /// Take the last non-empty path segment of a URI or `Location` header.
    pub fn from_uri(uri: &str) -> Option<Self> {
        uri.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(|segment| Self(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Scan settings
// ---------------------------------------------------------------------------

/// What the user asked for on the front panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    /// Multi-page document, saved as PDF.
    Document,
    /// Photo, saved as JPEG file(s).
    Photo,
}

impl DocumentKind {
    /// Map a front-panel shortcut (`SavePDF`, `SaveJPEG`, ...) to a kind.
    pub fn from_shortcut(shortcut: &str) -> Result<Self> {
        match shortcut.trim() {
            "SavePDF" | "SaveDoc" | "SaveDocument" => Ok(Self::Document),
            "SaveJPEG" | "SavePhoto" => Ok(Self::Photo),
            other => Err(ScanwerkError::Protocol(format!(
                "unsupported front-panel shortcut {other:?}"
            ))),
        }
    }

    /// File extension of the assembled output.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Document => "pdf",
            Self::Photo => "jpg",
        }
    }

    /// `ContentType` value sent in scan-job settings.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Photo => "Photo",
        }
    }
}

/// Physical input of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanSource {
    /// Flatbed glass.
    Platen,
    /// Automatic document feeder.
    Adf,
}

impl ScanSource {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Adf => "Adf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Color,
    Gray,
}

impl ColorSpace {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Color => "Color",
            Self::Gray => "Gray",
        }
    }
}

/// Scanner settings for one document kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanProfile {
    /// Requested resolution cap in dpi.
    pub resolution: u32,
    /// Lower cap used when scanning from the feeder, if any.
    pub adf_resolution: Option<u32>,
    pub color_space: ColorSpace,
    pub compression_q: u32,
    pub bit_depth: u32,
    pub gamma: u32,
    pub brightness: u32,
    pub contrast: u32,
    pub highlight: u32,
    pub shadow: u32,
    pub threshold: u32,
    pub sharpening: u32,
    pub noise_removal: u32,
}

impl ScanProfile {
    pub fn with_resolution(resolution: u32, color_space: ColorSpace) -> Self {
        Self {
            resolution,
            color_space,
            ..Self::default()
        }
    }

    /// Resolution cap for the given source.
    pub fn resolution_for(&self, source: ScanSource) -> u32 {
        match (source, self.adf_resolution) {
            (ScanSource::Adf, Some(adf)) => adf,
            _ => self.resolution,
        }
    }
}

impl Default for ScanProfile {
    fn default() -> Self {
        Self {
            resolution: 200,
            adf_resolution: None,
            color_space: ColorSpace::Color,
            compression_q: 15,
            bit_depth: 8,
            gamma: 1000,
            brightness: 1000,
            contrast: 1000,
            highlight: 179,
            shadow: 25,
            threshold: 0,
            sharpening: 128,
            noise_removal: 0,
        }
    }
}

/// Configured destination, before registration with a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationProfile {
    /// Short name shown on the device panel (suffixed to the computer name).
    pub name: String,
    /// Output path pattern; falls back to the global pattern when absent.
    #[serde(default)]
    pub output_pattern: Option<String>,
    #[serde(default)]
    pub ocr: bool,
    #[serde(default)]
    pub duplex: bool,
    #[serde(default)]
    pub document: ScanProfile,
    #[serde(default)]
    pub photo: ScanProfile,
}

impl DestinationProfile {
    pub fn scan_profile(&self, kind: DocumentKind) -> &ScanProfile {
        match kind {
            DocumentKind::Document => &self.document,
            DocumentKind::Photo => &self.photo,
        }
    }
}

/// A destination after the device accepted it.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub profile: DestinationProfile,
    /// Display name registered on the device.
    pub display_name: String,
    /// Output path pattern in effect for this destination.
    pub output_pattern: String,
    pub id: DestinationId,
    pub resource_uri: String,
}

impl Destination {
    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

// ---------------------------------------------------------------------------
// Device events
// ---------------------------------------------------------------------------

/// Opaque change marker ("aging stamp") attached to device events.
///
/// Tokens made of unsigned integers separated by `-` or `.` compare segment
/// by segment numerically, so `1-10` is newer than `1-9`. Anything else
/// compares as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(pub String);

impl ChangeToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.segments(), other.segments()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }

    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Greater
    }

    fn segments(&self) -> Option<Vec<u128>> {
        self.0
            .trim()
            .split(['-', '.'])
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                part.parse().ok()
            })
            .collect()
    }
}

impl std::fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Scan,
    PoweringDown,
    Other(String),
}

impl EventCategory {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "ScanEvent" => Self::Scan,
            "PoweringDownEvent" => Self::PoweringDown,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Payload reference carried by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub uri: String,
}

/// Walkup destination payload type on scan events.
pub const WALKUP_DESTINATION_RESOURCE: &str = "wus:WalkupScanToCompDestination";

/// One entry of the device event table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub category: EventCategory,
    pub token: ChangeToken,
    pub payload: Vec<ResourceRef>,
}

impl DeviceEvent {
    /// URI of the walkup destination this event refers to, if any.
    pub fn walkup_destination_uri(&self) -> Option<&str> {
        self.payload
            .iter()
            .find(|r| r.resource_type == WALKUP_DESTINATION_RESOURCE)
            .map(|r| r.uri.as_str())
    }
}

/// Front-panel interaction reported by the walkup-event resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalkupEventType {
    HostSelected,
    ScanRequested,
    ScanNewPageRequested,
    ScanPagesComplete,
}

impl WalkupEventType {
    pub fn from_wire(raw: &str) -> Result<Self> {
        match raw.trim() {
            "HostSelected" => Ok(Self::HostSelected),
            "ScanRequested" => Ok(Self::ScanRequested),
            "ScanNewPageRequested" => Ok(Self::ScanNewPageRequested),
            "ScanPagesComplete" => Ok(Self::ScanPagesComplete),
            other => Err(ScanwerkError::Protocol(format!(
                "unknown walkup event type {other:?}"
            ))),
        }
    }
}

/// Classification of errors for reconnect logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip, timeout, device rebooting: reconnect after a delay.
    Transient,
    /// Misconfiguration: reconnecting cannot help.
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_mapping() {
        assert_eq!(
            DocumentKind::from_shortcut("SaveDoc").expect("doc"),
            DocumentKind::Document
        );
        assert_eq!(
            DocumentKind::from_shortcut("SavePDF").expect("pdf"),
            DocumentKind::Document
        );
        assert_eq!(
            DocumentKind::from_shortcut("SaveJPEG").expect("jpeg"),
            DocumentKind::Photo
        );
        assert!(DocumentKind::from_shortcut("EmailPDF").is_err());
    }

    #[test]
    fn destination_id_is_last_segment() {
        let id = DestinationId::from_uri(
            "http://printer/WalkupScanToComp/WalkupScanToCompDestinations/1c8a5d",
        )
        .expect("segment");
        assert_eq!(id.as_str(), "1c8a5d");
        assert_eq!(
            DestinationId::from_uri("/WalkupScanToComp/Destinations/abc/")
                .expect("trailing slash")
                .as_str(),
            "abc"
        );
        assert!(DestinationId::from_uri("").is_none());
    }

    #[test]
    fn numeric_tokens_compare_by_value() {
        let nine = ChangeToken::new("9");
        let ten = ChangeToken::new("10");
        assert!(ten.is_newer_than(&nine));
        assert!(!nine.is_newer_than(&ten));
        assert!(!ten.is_newer_than(&ten));
    }

    #[test]
    fn dashed_tokens_compare_per_segment() {
        let older = ChangeToken::new("1-9");
        let newer = ChangeToken::new("1-10");
        assert!(newer.is_newer_than(&older));
        assert!(ChangeToken::new("2-1").is_newer_than(&newer));
    }

    #[test]
    fn opaque_tokens_compare_as_strings() {
        let a = ChangeToken::new("1-9");
        let b = ChangeToken::new("1-a");
        assert!(b.is_newer_than(&a));
    }

    #[test]
    fn adf_cap_overrides_platen() {
        let profile = ScanProfile {
            resolution: 300,
            adf_resolution: Some(200),
            ..ScanProfile::default()
        };
        assert_eq!(profile.resolution_for(ScanSource::Platen), 300);
        assert_eq!(profile.resolution_for(ScanSource::Adf), 200);
    }
}
