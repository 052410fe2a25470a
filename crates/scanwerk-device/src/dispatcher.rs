// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The dispatch loop for one device connection.
//
// Device events, job reports, the duplex timer and periodic re-registration
// all arrive here and are handled one at a time, so the session controller
// and the duplex coordinator never see overlapping transitions.

use std::collections::VecDeque;
use std::sync::Arc;

use scanwerk_core::config::AppConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use scanwerk_core::types::{
    Destination, DestinationId, DeviceEvent, DocumentKind, EventCategory, SessionId,
    WalkupEventType,
};
use scanwerk_document::{
    AssemblyQueue, DuplexCoordinator, DuplexEffect, DuplexEvent, FinishedSession,
    PipelineWorkerPool, SessionEnd,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::api::DeviceApi;
use crate::events::{ChangeLedger, EventPoller, PollerMessage};
use crate::registrar::{DestinationMap, DeviceRegistrar};
use crate::session::{ScanSessionController, SessionUpdate};

pub struct Dispatcher {
    device: Arc<dyn DeviceApi>,
    config: Arc<AppConfig>,
    destinations: DestinationMap,
    sessions: ScanSessionController,
    /// One pending recto for the whole device, whichever destination it
    /// came from.
    duplex: DuplexCoordinator<FinishedSession>,
    assembly: AssemblyQueue,
    log: Arc<dyn OperationalLog>,
    /// When the duplex window elapses, if it is running.
    deadline: Option<Instant>,
}

impl Dispatcher {
    pub fn new(
        device: Arc<dyn DeviceApi>,
        config: Arc<AppConfig>,
        pool: Option<PipelineWorkerPool>,
        assembly: AssemblyQueue,
        log: Arc<dyn OperationalLog>,
    ) -> Self {
        let sessions = ScanSessionController::new(
            Arc::clone(&device),
            config.timing.clone(),
            pool,
            Arc::clone(&log),
        );
        Self {
            device,
            config,
            destinations: DestinationMap::new(),
            sessions,
            duplex: DuplexCoordinator::new(),
            assembly,
            log,
            deadline: None,
        }
    }

    /// Register, then dispatch until `shutdown` flips or the connection is
    /// lost. `Ok` means an orderly shutdown; the error says why the
    /// connection ended. Either way the open session and any held recto are
    /// handed to the assembler before returning.
    #[instrument(skip_all, fields(device = %self.config.device_url))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if *shutdown.borrow() {
            return Ok(());
        }
        self.register().await?;
        self.log.record(OpEvent::Connected {
            device: self.config.device_url.clone(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poller = Some(EventPoller::spawn(
            Arc::clone(&self.device),
            ChangeLedger::new(),
            tx.clone(),
        ));

        let period = self.config.timing.reregister_interval();
        let mut reregister = tokio::time::interval_at(Instant::now() + period, period);
        reregister.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            let deadline = self.deadline;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        break Ok(());
                    }
                }
                Some(message) = rx.recv() => match message {
                    PollerMessage::Events(events) => {
                        if let Err(e) = self.on_events(events).await {
                            break Err(e);
                        }
                    }
                    PollerMessage::Failed(e) => {
                        poller = None;
                        break Err(e);
                    }
                },
                Some(message) = self.sessions.recv() => {
                    match self.sessions.on_message(message).await {
                        SessionUpdate::Ignored => {}
                        SessionUpdate::Activity(id) => {
                            self.drive(DuplexEvent::SessionActivity(id)).await;
                        }
                        SessionUpdate::Ended(finished) => {
                            self.drive(DuplexEvent::SessionEnded(finished)).await;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!("duplex window elapsed");
                    self.deadline = None;
                    self.drive(DuplexEvent::TimerFired).await;
                }
                _ = reregister.tick() => {
                    let ledger = match poller.take() {
                        Some(running) => running.stop().await,
                        None => ChangeLedger::new(),
                    };
                    if let Err(e) = self.register().await {
                        break Err(e);
                    }
                    poller = Some(EventPoller::spawn(Arc::clone(&self.device), ledger, tx.clone()));
                }
            }
        };

        if let Some(running) = poller {
            running.stop().await;
        }
        self.wind_down(result.as_ref().err()).await;
        result
    }

    async fn register(&mut self) -> Result<()> {
        let map = DeviceRegistrar::new(self.device.as_ref(), &self.config, self.log.as_ref())
            .register()
            .await?;
        self.destinations = map;
        Ok(())
    }

    // -- Device events --

    /// Handle a batch in order. An error ends the connection.
    async fn on_events(&mut self, events: Vec<DeviceEvent>) -> Result<()> {
        for event in events {
            self.on_event(event).await?;
        }
        Ok(())
    }

    async fn on_event(&mut self, event: DeviceEvent) -> Result<()> {
        match &event.category {
            EventCategory::PoweringDown => return Err(ScanwerkError::PoweringDown),
            EventCategory::Scan => {}
            EventCategory::Other(name) => {
                trace!(category = %name, "event ignored");
                return Ok(());
            }
        }

        let Some((uri, destination)) = self.resolve(&event) else {
            return Ok(());
        };

        match self.on_walkup(destination, &uri).await {
            Ok(()) => {}
            Err(ScanwerkError::Protocol(reason)) => {
                self.log.record(OpEvent::EventRejected { reason });
            }
            Err(e) => {
                warn!(error = %e, "scan event failed, aborting the session");
                if let Some(finished) = self.sessions.fail(e.to_string()).await {
                    self.drive(DuplexEvent::SessionEnded(finished)).await;
                }
            }
        }
        Ok(())
    }

    /// Our destination behind a scan event. Events for destinations we did
    /// not register belong to someone else and are skipped.
    fn resolve(&self, event: &DeviceEvent) -> Option<(String, Arc<Destination>)> {
        let uri = event.walkup_destination_uri()?;
        let id = DestinationId::from_uri(uri)?;
        match self.destinations.get(&id) {
            Some(destination) => Some((uri.to_string(), Arc::clone(destination))),
            None => {
                debug!(%id, "scan event for a destination that is not ours");
                None
            }
        }
    }

    async fn on_walkup(&mut self, destination: Arc<Destination>, uri: &str) -> Result<()> {
        let event_type = self.device.walkup_event().await?;
        debug!(?event_type, destination = %destination.display_name, "walkup event");

        match event_type {
            WalkupEventType::HostSelected => {
                let (id, previous) = self.sessions.start(destination).await?;
                if let Some(previous) = previous {
                    self.drive(DuplexEvent::SessionEnded(previous)).await;
                }
                self.drive(DuplexEvent::SessionStarted(id)).await;
            }
            WalkupEventType::ScanRequested | WalkupEventType::ScanNewPageRequested => {
                let Some(session) = self.sessions.session_for(&destination.id) else {
                    return Err(ScanwerkError::Protocol(format!(
                        "{event_type:?} for {} without a selected destination",
                        destination.display_name
                    )));
                };
                let kind = match self.document_kind(uri).await {
                    Ok(kind) => kind,
                    Err(e @ ScanwerkError::Protocol(_)) => {
                        self.abort(session, &e).await;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                self.drive(DuplexEvent::SessionActivity(session)).await;
                self.sessions.scan(kind).await?;
            }
            WalkupEventType::ScanPagesComplete => {
                if let Some(finished) = self.sessions.complete().await? {
                    self.drive(DuplexEvent::SessionEnded(finished)).await;
                }
            }
        }
        Ok(())
    }

    /// Read the front-panel choice from the destination resource.
    async fn document_kind(&self, uri: &str) -> Result<DocumentKind> {
        let entry = self.device.destination(uri).await?;
        let shortcut = entry.shortcut.ok_or_else(|| {
            ScanwerkError::Protocol(format!("destination {} has no shortcut", entry.name))
        })?;
        DocumentKind::from_shortcut(&shortcut)
    }

    async fn abort(&mut self, session: SessionId, err: &ScanwerkError) {
        if let Some(finished) = self
            .sessions
            .close(session, SessionEnd::Failed(err.to_string()))
            .await
        {
            self.drive(DuplexEvent::SessionEnded(finished)).await;
        }
    }

    // -- Duplex --

    /// Feed one event to the coordinator and carry out its effects,
    /// including any follow-up events they cause.
    async fn drive(&mut self, event: DuplexEvent<FinishedSession>) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.duplex.handle(event) {
                match effect {
                    DuplexEffect::Assemble(assembly) => {
                        if let Err(e) = self.assembly.submit(assembly) {
                            self.log.record(OpEvent::AssemblyFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                    DuplexEffect::CloseSession(id) => {
                        if let Some(finished) = self.sessions.close(id, SessionEnd::Closed).await {
                            queue.push_back(DuplexEvent::SessionEnded(finished));
                        }
                    }
                    DuplexEffect::ResetTimer => {
                        self.deadline = Some(Instant::now() + self.config.timing.duplex_window());
                    }
                    DuplexEffect::StopTimer => self.deadline = None,
                }
            }
        }
    }

    /// Close the open session and release anything held for duplex.
    async fn wind_down(&mut self, error: Option<&ScanwerkError>) {
        let finished = match error {
            Some(ScanwerkError::PoweringDown) | None => match self.sessions.current_id() {
                Some(id) => self.sessions.close(id, SessionEnd::Closed).await,
                None => None,
            },
            Some(e) => self.sessions.fail(e.to_string()).await,
        };
        if let Some(finished) = finished {
            self.drive(DuplexEvent::SessionEnded(finished)).await;
        }
        self.drive(DuplexEvent::TimerFired).await;
        debug!(phase = %self.duplex.phase(), "dispatcher stopped");
    }
}
