// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Destination registration.
//
// Each configured profile shows up on the device panel as
// "<computer name>(<profile name>)". The device does not deduplicate, so the
// existing list is read first and matching entries are reused.

use std::collections::HashMap;
use std::sync::Arc;

use scanwerk_core::config::AppConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use scanwerk_core::types::{Destination, DestinationId};
use tracing::{debug, info, instrument, warn};

use crate::api::DeviceApi;

/// Registered destinations keyed by the identifier events refer to.
pub type DestinationMap = HashMap<DestinationId, Arc<Destination>>;

pub struct DeviceRegistrar<'a> {
    device: &'a dyn DeviceApi,
    config: &'a AppConfig,
    log: &'a dyn OperationalLog,
}

impl<'a> DeviceRegistrar<'a> {
    pub fn new(
        device: &'a dyn DeviceApi,
        config: &'a AppConfig,
        log: &'a dyn OperationalLog,
    ) -> Self {
        Self { device, config, log }
    }

    /// Name shown on the device panel for a profile.
    pub fn display_name(computer_name: &str, profile_name: &str) -> String {
        format!("{computer_name}({profile_name})")
    }

    /// Register every configured destination. Any failure aborts the whole
    /// registration.
    #[instrument(skip(self), fields(destinations = self.config.destinations.len()))]
    pub async fn register(&self) -> Result<DestinationMap> {
        if self.config.destinations.is_empty() {
            return Err(ScanwerkError::Config("no destinations configured".into()));
        }
        let tree = self.device.discovery_tree().await?;
        if !tree.supports_walkup_scan() {
            warn!(
                revision = ?tree.revision,
                "device does not advertise walkup scan-to-computer, trying anyway"
            );
        }

        let existing = self.device.list_destinations().await?;
        debug!(existing = existing.len(), "destinations already on the device");

        let mut map = DestinationMap::new();
        for profile in &self.config.destinations {
            let display_name = Self::display_name(&self.config.computer_name, &profile.name);

            let resource_uri = match existing.iter().find(|e| e.name == display_name) {
                Some(entry) => {
                    debug!(name = %display_name, uri = %entry.resource_uri, "reusing destination");
                    entry.resource_uri.clone()
                }
                None => self.device.create_destination(&display_name).await?,
            };

            let id = DestinationId::from_uri(&resource_uri).ok_or_else(|| {
                ScanwerkError::Protocol(format!(
                    "destination {display_name:?} has no identifier in {resource_uri:?}"
                ))
            })?;

            let destination = Destination {
                profile: profile.clone(),
                display_name: display_name.clone(),
                output_pattern: self.config.pattern_for(profile).to_string(),
                id: id.clone(),
                resource_uri,
            };
            self.log.record(OpEvent::DestinationRegistered {
                name: display_name,
                id: id.clone(),
            });
            map.insert(id, Arc::new(destination));
        }

        info!(count = map.len(), "destinations registered");
        Ok(map)
    }
}
