// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Wire format of the device's embedded web service (LEDM).
//
// Responses are small XML documents with a handful of namespaces. Elements
// are matched by local name only, which keeps us working across firmware
// revisions that move elements between the `dd`, `dd3` and `wus` prefixes.
//
// Resources used:
//   GET  /DevMgmt/DiscoveryTree.xml
//   GET  /WalkupScanToComp/WalkupScanToCompDestinations
//   POST /WalkupScanToComp/WalkupScanToCompDestinations
//   GET  /WalkupScanToComp/WalkupScanToCompDestinations/<id>
//   GET  /WalkupScanToComp/WalkupScanToCompEvent
//   GET  /EventMgmt/EventTable[?timeout=N]
//   GET  /Scan/Status
//   GET  /Scan/ScanCaps.xml
//   POST /Scan/Jobs, then GET on the returned job URL

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{
    ChangeToken, DeviceEvent, DocumentKind, EventCategory, ResourceRef, ScanProfile, ScanSource,
    WalkupEventType,
};

pub const DISCOVERY_TREE_PATH: &str = "/DevMgmt/DiscoveryTree.xml";
pub const DESTINATIONS_PATH: &str = "/WalkupScanToComp/WalkupScanToCompDestinations";
pub const WALKUP_EVENT_PATH: &str = "/WalkupScanToComp/WalkupScanToCompEvent";
pub const EVENT_TABLE_PATH: &str = "/EventMgmt/EventTable";
pub const SCAN_STATUS_PATH: &str = "/Scan/Status";
pub const SCAN_CAPS_PATH: &str = "/Scan/ScanCaps.xml";
pub const SCAN_JOBS_PATH: &str = "/Scan/Jobs";

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;
const NS_WALKUP: &str = "http://www.hp.com/schemas/imaging/con/ledm/walkupscan/2010/09/28";
const NS_DICT: &str = "http://www.hp.com/schemas/imaging/con/dictionaries/1.0/";
const NS_DICT3: &str = "http://www.hp.com/schemas/imaging/con/dictionaries/2009/04/06";
const NS_SCAN: &str = "http://www.hp.com/schemas/imaging/con/cnx/scan/2008/08/19";

/// Scan area sent with every job, in 1/300 inch (A4 at 300 dpi).
const SCAN_WIDTH: u32 = 2481;
const SCAN_HEIGHT: u32 = 3507;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Capability probe answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryTree {
    pub revision: Option<String>,
    /// Resource types of every supported tree and interface.
    pub resource_types: Vec<String>,
}

impl DiscoveryTree {
    pub fn supports_walkup_scan(&self) -> bool {
        self.resource_types
            .iter()
            .any(|t| t.to_ascii_lowercase().contains("walkupscan"))
    }
}

/// A destination as listed by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationEntry {
    pub name: String,
    pub hostname: String,
    pub resource_uri: String,
    /// Front-panel choice (`SavePDF`, `SaveJPEG`, ...), present once the user
    /// has picked one.
    pub shortcut: Option<String>,
}

/// `/Scan/Status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStatus {
    /// e.g. `Idle`, `BusyWithScanJob`, `AdfError`.
    pub scanner_state: String,
    /// `Empty`, `Loaded`, `Jammed`, or empty on flatbed-only devices.
    pub adf_state: String,
}

impl ScanStatus {
    pub fn feeder_loaded(&self) -> bool {
        self.adf_state == "Loaded"
    }

    pub fn source(&self) -> ScanSource {
        if self.feeder_loaded() {
            ScanSource::Adf
        } else {
            ScanSource::Platen
        }
    }
}

/// Supported resolutions per input source, in device order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCaps {
    pub model: Option<String>,
    pub platen: Vec<u32>,
    pub adf: Vec<u32>,
}

impl ScanCaps {
    pub fn resolutions(&self, source: ScanSource) -> &[u32] {
        match source {
            ScanSource::Platen => &self.platen,
            ScanSource::Adf => &self.adf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Completed,
    Canceled,
    Other(String),
}

impl JobState {
    fn from_wire(raw: &str) -> Self {
        match raw {
            "Processing" => Self::Processing,
            "Completed" => Self::Completed,
            "Canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A page the device has finished scanning and is ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyPage {
    pub page_number: u32,
    pub binary_url: String,
    /// Real line count, to patch into the JPEG header.
    pub image_height: u32,
}

/// One poll of a scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub ready_page: Option<ReadyPage>,
    /// Post-scan page state says the user cancelled on the panel.
    pub canceled_by_device: bool,
}

/// Settings for one scan job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJobSettings {
    pub resolution: u32,
    pub source: ScanSource,
    pub kind: DocumentKind,
    pub profile: ScanProfile,
}

/// Answer of a conditional event-table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTableResponse {
    NotModified,
    Changed {
        etag: Option<String>,
        events: Vec<DeviceEvent>,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_discovery_tree(xml: &str) -> Result<DiscoveryTree> {
    let root = parse_document(xml, "DiscoveryTree")?;
    let resource_types = root
        .children
        .iter()
        .filter(|n| n.name == "SupportedTree" || n.name == "SupportedIfc")
        .filter_map(|n| n.text_of("ResourceType"))
        .map(str::to_string)
        .collect();
    Ok(DiscoveryTree {
        revision: root.find(&["Version", "Revision"]).map(|n| n.text.clone()),
        resource_types,
    })
}

pub fn parse_destinations(xml: &str) -> Result<Vec<DestinationEntry>> {
    let root = parse_document(xml, "WalkupScanToCompDestinations")?;
    Ok(root
        .children_named("WalkupScanToCompDestination")
        .map(destination_entry)
        .collect())
}

/// A single destination resource.
pub fn parse_destination(xml: &str) -> Result<DestinationEntry> {
    let root = parse_document(xml, "WalkupScanToCompDestination")?;
    Ok(destination_entry(&root))
}

fn destination_entry(node: &Node) -> DestinationEntry {
    DestinationEntry {
        name: node.text_of("Name").unwrap_or_default().to_string(),
        hostname: node.text_of("Hostname").unwrap_or_default().to_string(),
        resource_uri: node.text_of("ResourceURI").unwrap_or_default().to_string(),
        shortcut: node
            .find(&["WalkupScanToCompSettings", "Shortcut"])
            .map(|n| n.text.clone())
            .filter(|s| !s.is_empty()),
    }
}

pub fn parse_event_table(xml: &str) -> Result<Vec<DeviceEvent>> {
    let root = parse_document(xml, "EventTable")?;
    Ok(root
        .children_named("Event")
        .map(|event| DeviceEvent {
            category: EventCategory::from_wire(
                event.text_of("UnqualifiedEventCategory").unwrap_or_default(),
            ),
            token: ChangeToken::new(event.text_of("AgingStamp").unwrap_or_default()),
            payload: event
                .children_named("Payload")
                .map(|p| ResourceRef {
                    resource_type: p.text_of("ResourceType").unwrap_or_default().to_string(),
                    uri: p.text_of("ResourceURI").unwrap_or_default().to_string(),
                })
                .collect(),
        })
        .collect())
}

pub fn parse_walkup_event(xml: &str) -> Result<WalkupEventType> {
    let root = parse_document(xml, "WalkupScanToCompEvent")?;
    let raw = root.text_of("WalkupScanToCompEventType").ok_or_else(|| {
        ScanwerkError::Protocol("walkup event without WalkupScanToCompEventType".into())
    })?;
    WalkupEventType::from_wire(raw)
}

pub fn parse_scan_status(xml: &str) -> Result<ScanStatus> {
    let root = parse_document(xml, "ScanStatus")?;
    Ok(ScanStatus {
        scanner_state: root.text_of("ScannerState").unwrap_or_default().to_string(),
        adf_state: root.text_of("AdfState").unwrap_or_default().to_string(),
    })
}

pub fn parse_scan_caps(xml: &str) -> Result<ScanCaps> {
    let root = parse_document(xml, "ScanCaps")?;
    let resolutions = |source: &str| -> Result<Vec<u32>> {
        let Some(list) = root.find(&[source, "InputSourceCaps", "SupportedResolutions"]) else {
            return Ok(Vec::new());
        };
        list.children_named("Resolution")
            .filter_map(|r| r.child("XResolution"))
            .map(|x| parse_number(&x.text, "XResolution"))
            .collect()
    };
    Ok(ScanCaps {
        model: root
            .find(&["DeviceCaps", "ModelName"])
            .map(|n| n.text.clone()),
        platen: resolutions("Platen")?,
        adf: resolutions("Adf")?,
    })
}

pub fn parse_job(xml: &str) -> Result<JobStatus> {
    let root = parse_document(xml, "Job")?;
    let state = root
        .text_of("JobState")
        .map(JobState::from_wire)
        .ok_or_else(|| ScanwerkError::Protocol("job without JobState".into()))?;

    let scan_job = root.child("ScanJob");
    let ready_page = match scan_job.and_then(|j| j.child("PreScanPage")) {
        Some(pre) if pre.text_of("PageState") == Some("ReadyToUpload") => {
            let binary_url = pre
                .text_of("BinaryURL")
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    ScanwerkError::Protocol("page ready to upload without BinaryURL".into())
                })?;
            let image_height = match pre.find(&["BufferInfo", "ImageHeight"]) {
                Some(h) => parse_number(&h.text, "ImageHeight")?,
                None => 0,
            };
            Some(ReadyPage {
                page_number: match pre.text_of("PageNumber") {
                    Some(n) => parse_number(n, "PageNumber")?,
                    None => 0,
                },
                binary_url: binary_url.to_string(),
                image_height,
            })
        }
        _ => None,
    };
    let canceled_by_device = scan_job
        .and_then(|j| j.find(&["PostScanPage", "PageState"]))
        .is_some_and(|s| s.text == "CanceledByDevice");

    Ok(JobStatus {
        state,
        ready_page,
        canceled_by_device,
    })
}

fn parse_number(raw: &str, field: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ScanwerkError::Protocol(format!("{field} is not a number: {raw:?}")))
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of the destination registration POST.
pub fn destination_body(display_name: &str) -> String {
    let name = escape(display_name);
    format!(
        "{XML_HEADER}<WalkupScanToCompDestination xmlns=\"{NS_WALKUP}\">\
         <Name xmlns=\"{NS_DICT}\">{name}</Name>\
         <Hostname xmlns=\"{NS_DICT3}\">{name}</Hostname>\
         <LinkType>Network</LinkType>\
         </WalkupScanToCompDestination>"
    )
}

/// Body of the scan job POST.
pub fn scan_settings_body(settings: &ScanJobSettings) -> String {
    let p = &settings.profile;
    let res = settings.resolution;
    format!(
        "{XML_HEADER}\n<ScanSettings xmlns=\"{NS_SCAN}\">\n\
         \x20 <XResolution>{res}</XResolution>\n\
         \x20 <YResolution>{res}</YResolution>\n\
         \x20 <XStart>0</XStart>\n\
         \x20 <YStart>0</YStart>\n\
         \x20 <Width>{SCAN_WIDTH}</Width>\n\
         \x20 <Height>{SCAN_HEIGHT}</Height>\n\
         \x20 <Format>Jpeg</Format>\n\
         \x20 <CompressionQFactor>{}</CompressionQFactor>\n\
         \x20 <ColorSpace>{}</ColorSpace>\n\
         \x20 <BitDepth>{}</BitDepth>\n\
         \x20 <InputSource>{}</InputSource>\n\
         \x20 <GrayRendering>NTSC</GrayRendering>\n\
         \x20 <ToneMap>\n\
         \x20   <Gamma>{}</Gamma>\n\
         \x20   <Brightness>{}</Brightness>\n\
         \x20   <Contrast>{}</Contrast>\n\
         \x20   <Highlite>{}</Highlite>\n\
         \x20   <Shadow>{}</Shadow>\n\
         \x20   <Threshold>{}</Threshold>\n\
         \x20 </ToneMap>\n\
         \x20 <SharpeningLevel>{}</SharpeningLevel>\n\
         \x20 <NoiseRemoval>{}</NoiseRemoval>\n\
         \x20 <ContentType>{}</ContentType>\n\
         </ScanSettings>",
        p.compression_q,
        p.color_space.wire_name(),
        p.bit_depth,
        settings.source.wire_name(),
        p.gamma,
        p.brightness,
        p.contrast,
        p.highlight,
        p.shadow,
        p.threshold,
        p.sharpening,
        p.noise_removal,
        settings.kind.content_type(),
    )
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

/// Minimal element tree: local name, concatenated text, children.
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn named(start: &BytesStart<'_>) -> Self {
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn find(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

/// Parse `xml` and check that its root element is `root`.
fn parse_document(xml: &str, root: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // Synthetic document node at the bottom of the stack.
    let mut stack: Vec<Node> = vec![Node::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Node::named(&e)),
            Ok(Event::Empty(e)) => {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::named(&e));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() < 2 {
                    return Err(ScanwerkError::Protocol(format!(
                        "unbalanced {root} document"
                    )));
                }
                if let (Some(node), Some(parent)) = (stack.pop(), stack.last_mut()) {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| {
                    ScanwerkError::Protocol(format!("bad text in {root} document: {e}"))
                })?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ScanwerkError::Protocol(format!(
                    "malformed {root} document at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    let document = match stack.pop() {
        Some(doc) if stack.is_empty() => doc,
        _ => {
            return Err(ScanwerkError::Protocol(format!(
                "truncated {root} document"
            )));
        }
    };
    let element = document
        .children
        .into_iter()
        .next()
        .ok_or_else(|| ScanwerkError::Protocol(format!("empty {root} document")))?;
    if element.name != root {
        return Err(ScanwerkError::Protocol(format!(
            "expected {root}, got {}",
            element.name
        )));
    }
    Ok(element)
}
