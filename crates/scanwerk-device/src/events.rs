// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event table long-polling and change-token de-duplication.
//
// The poller runs as its own task and feeds a channel owned by the
// dispatcher. Stopping it (for re-registration) hands its ledger back, so
// the next poller keeps filtering against the same tokens and nothing that
// was already queued is lost.

use std::collections::HashMap;
use std::sync::Arc;

use scanwerk_core::error::ScanwerkError;
use scanwerk_core::types::{ChangeToken, DeviceEvent, EventCategory};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::api::DeviceApi;
use crate::ledm::EventTableResponse;

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Last accepted change token per event category.
#[derive(Debug, Default, Clone)]
pub struct ChangeLedger {
    last: HashMap<EventCategory, ChangeToken>,
    primed: bool,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a baseline has been taken.
    pub fn primed(&self) -> bool {
        self.primed
    }

    pub fn last_token(&self, category: &EventCategory) -> Option<&ChangeToken> {
        self.last.get(category)
    }

    /// Filter one event table down to the events not seen before.
    ///
    /// The first table only records the baseline: whatever is already on
    /// the device when we connect is history.
    pub fn accept(&mut self, events: Vec<DeviceEvent>) -> Vec<DeviceEvent> {
        if !self.primed {
            self.primed = true;
            for event in events {
                self.observe(event);
            }
            debug!(categories = self.last.len(), "event baseline recorded");
            return Vec::new();
        }
        events.into_iter().filter_map(|e| self.observe(e)).collect()
    }

    /// Record `event` if its token is strictly newer; return it if so.
    fn observe(&mut self, event: DeviceEvent) -> Option<DeviceEvent> {
        if let Some(last) = self.last.get(&event.category) {
            if !event.token.is_newer_than(last) {
                trace!(category = ?event.category, token = %event.token, last = %last, "stale event");
                return None;
            }
        }
        self.last.insert(event.category.clone(), event.token.clone());
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// What the poller sends to the dispatcher.
#[derive(Debug)]
pub enum PollerMessage {
    /// New events, in table order.
    Events(Vec<DeviceEvent>),
    /// The poll failed; the poller has stopped and the connection must be
    /// rebuilt.
    Failed(ScanwerkError),
}

/// Handle to a running poll loop.
pub struct EventPoller {
    stop: oneshot::Sender<()>,
    join: JoinHandle<ChangeLedger>,
}

impl EventPoller {
    /// Start polling `device`, filtering through `ledger`.
    pub fn spawn(
        device: Arc<dyn DeviceApi>,
        ledger: ChangeLedger,
        tx: mpsc::UnboundedSender<PollerMessage>,
    ) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let join = tokio::spawn(poll_loop(device, ledger, tx, stop_rx));
        Self { stop, join }
    }

    /// Stop polling and take the ledger back. An in-flight request is
    /// abandoned; events already sent stay in the channel.
    pub async fn stop(self) -> ChangeLedger {
        let _ = self.stop.send(());
        match self.join.await {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(error = %e, "event poller ended abnormally, starting a fresh ledger");
                ChangeLedger::new()
            }
        }
    }
}

async fn poll_loop(
    device: Arc<dyn DeviceApi>,
    mut ledger: ChangeLedger,
    tx: mpsc::UnboundedSender<PollerMessage>,
    mut stop: oneshot::Receiver<()>,
) -> ChangeLedger {
    let mut etag: Option<String> = None;
    debug!("event poller started");

    loop {
        let response = tokio::select! {
            biased;
            _ = &mut stop => break,
            response = device.event_table(etag.as_deref()) => response,
        };

        match response {
            Ok(EventTableResponse::NotModified) => {
                trace!("event table unchanged");
            }
            Ok(EventTableResponse::Changed { etag: tag, events }) => {
                if tag.is_none() {
                    warn!("event table answered without an ETag");
                }
                etag = tag;
                let fresh = ledger.accept(events);
                if fresh.is_empty() {
                    continue;
                }
                debug!(events = fresh.len(), "new device events");
                if tx.send(PollerMessage::Events(fresh)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "event poll failed");
                let _ = tx.send(PollerMessage::Failed(e));
                break;
            }
        }
    }

    debug!("event poller stopped");
    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PageStream;
    use crate::ledm::{
        DestinationEntry, DiscoveryTree, JobStatus, ScanCaps, ScanJobSettings, ScanStatus,
    };
    use async_trait::async_trait;
    use scanwerk_core::error::Result;
    use scanwerk_core::types::{ResourceRef, WalkupEventType};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn event(category: EventCategory, token: &str) -> DeviceEvent {
        DeviceEvent {
            category,
            token: ChangeToken::new(token),
            payload: vec![ResourceRef {
                resource_type: "wus:WalkupScanToCompDestination".into(),
                uri: "/WalkupScanToComp/WalkupScanToCompDestinations/abc".into(),
            }],
        }
    }

    #[test]
    fn first_table_is_baseline_only() {
        let mut ledger = ChangeLedger::new();
        let out = ledger.accept(vec![event(EventCategory::Scan, "1-5")]);
        assert!(out.is_empty());
        assert!(ledger.primed());
        assert_eq!(
            ledger.last_token(&EventCategory::Scan),
            Some(&ChangeToken::new("1-5"))
        );
    }

    #[test]
    fn stale_and_repeated_tokens_are_dropped() {
        let mut ledger = ChangeLedger::new();
        ledger.accept(vec![event(EventCategory::Scan, "1-9")]);

        assert_eq!(ledger.accept(vec![event(EventCategory::Scan, "1-9")]), vec![]);
        assert_eq!(ledger.accept(vec![event(EventCategory::Scan, "1-3")]), vec![]);

        let fresh = ledger.accept(vec![event(EventCategory::Scan, "1-10")]);
        assert_eq!(fresh.len(), 1);
        // An older token arriving after a newer one is not replayed.
        assert_eq!(ledger.accept(vec![event(EventCategory::Scan, "1-9")]), vec![]);
    }

    #[test]
    fn categories_are_tracked_separately() {
        let mut ledger = ChangeLedger::new();
        ledger.accept(vec![event(EventCategory::Scan, "7")]);
        let fresh = ledger.accept(vec![
            event(EventCategory::PoweringDown, "1"),
            event(EventCategory::Scan, "8"),
        ]);
        assert_eq!(fresh.len(), 2);
    }

    /// Serves a scripted sequence of event-table answers, then hangs.
    #[derive(Default)]
    struct TableDevice {
        script: Mutex<VecDeque<Result<EventTableResponse>>>,
        seen_etags: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl DeviceApi for TableDevice {
        async fn discovery_tree(&self) -> Result<DiscoveryTree> {
            unreachable!()
        }
        async fn list_destinations(&self) -> Result<Vec<DestinationEntry>> {
            unreachable!()
        }
        async fn create_destination(&self, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn destination(&self, _: &str) -> Result<DestinationEntry> {
            unreachable!()
        }
        async fn event_table(&self, etag: Option<&str>) -> Result<EventTableResponse> {
            self.seen_etags
                .lock()
                .expect("etags")
                .push(etag.map(str::to_string));
            let next = self.script.lock().expect("script").pop_front();
            match next {
                Some(answer) => answer,
                None => std::future::pending().await,
            }
        }
        async fn walkup_event(&self) -> Result<WalkupEventType> {
            unreachable!()
        }
        async fn scan_status(&self) -> Result<ScanStatus> {
            unreachable!()
        }
        async fn scan_caps(&self) -> Result<ScanCaps> {
            unreachable!()
        }
        async fn submit_job(&self, _: &ScanJobSettings) -> Result<String> {
            unreachable!()
        }
        async fn job_status(&self, _: &str) -> Result<JobStatus> {
            unreachable!()
        }
        async fn download_page(&self, _: &str) -> Result<PageStream> {
            unreachable!()
        }
    }

    fn changed(tag: &str, events: Vec<DeviceEvent>) -> Result<EventTableResponse> {
        Ok(EventTableResponse::Changed {
            etag: Some(tag.into()),
            events,
        })
    }

    #[tokio::test]
    async fn poller_forwards_fresh_events_and_returns_ledger() {
        let device = Arc::new(TableDevice::default());
        device.script.lock().expect("script").extend([
            changed("a", vec![event(EventCategory::Scan, "3")]),
            Ok(EventTableResponse::NotModified),
            changed("b", vec![event(EventCategory::Scan, "4")]),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let poller = EventPoller::spawn(device.clone(), ChangeLedger::new(), tx);
        let Some(PollerMessage::Events(events)) = rx.recv().await else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, ChangeToken::new("4"));

        let ledger = poller.stop().await;
        assert_eq!(
            ledger.last_token(&EventCategory::Scan),
            Some(&ChangeToken::new("4"))
        );
        let seen = device.seen_etags.lock().expect("etags").clone();
        assert_eq!(
            seen[..3],
            [None, Some("a".to_string()), Some("a".to_string())]
        );
    }

    #[tokio::test]
    async fn poller_reports_failure_and_stops() {
        let device = Arc::new(TableDevice::default());
        device
            .script
            .lock()
            .expect("script")
            .push_back(Err(ScanwerkError::Transport("timed out".into())));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let poller = EventPoller::spawn(device, ChangeLedger::new(), tx);
        assert!(matches!(
            rx.recv().await,
            Some(PollerMessage::Failed(ScanwerkError::Transport(_)))
        ));
        let ledger = poller.stop().await;
        assert!(!ledger.primed());
    }

    #[tokio::test]
    async fn restarted_poller_keeps_filtering() {
        let mut ledger = ChangeLedger::new();
        ledger.accept(vec![event(EventCategory::Scan, "10")]);

        let device = Arc::new(TableDevice::default());
        device.script.lock().expect("script").extend([
            changed("x", vec![event(EventCategory::Scan, "10")]),
            changed("y", vec![event(EventCategory::Scan, "11")]),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let poller = EventPoller::spawn(device, ledger, tx);
        let Some(PollerMessage::Events(events)) = rx.recv().await else {
            panic!("expected events");
        };
        assert_eq!(events[0].token, ChangeToken::new("11"));
        poller.stop().await;
    }
}
