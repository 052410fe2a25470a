// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconnect supervisor: keeps a dispatcher running against the device for
// as long as the process lives.

use std::sync::Arc;

use scanwerk_core::config::AppConfig;
use scanwerk_core::error::Result;
use scanwerk_core::telemetry::{OpEvent, OperationalLog};
use scanwerk_document::{AssemblyQueue, PipelineWorkerPool};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use crate::api::DeviceApi;
use crate::dispatcher::Dispatcher;
use crate::retry::{Backoff, RetryConfig, RetryDecision};

pub struct Supervisor {
    device: Arc<dyn DeviceApi>,
    config: Arc<AppConfig>,
    pool: Option<PipelineWorkerPool>,
    assembly: AssemblyQueue,
    log: Arc<dyn OperationalLog>,
    retry: RetryConfig,
}

impl Supervisor {
    pub fn new(
        device: Arc<dyn DeviceApi>,
        config: Arc<AppConfig>,
        pool: Option<PipelineWorkerPool>,
        assembly: AssemblyQueue,
        log: Arc<dyn OperationalLog>,
    ) -> Self {
        let retry = RetryConfig::from(&config.timing);
        Self {
            device,
            config,
            pool,
            assembly,
            log,
            retry,
        }
    }

    /// Replace the backoff derived from the timing configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Connect, dispatch, and reconnect after every lost connection until
    /// `shutdown` flips. Returns an error only for failures reconnecting
    /// cannot fix.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = Backoff::new(self.retry.clone());

        loop {
            let started = Instant::now();
            let dispatcher = Dispatcher::new(
                Arc::clone(&self.device),
                Arc::clone(&self.config),
                self.pool.clone(),
                self.assembly.clone(),
                Arc::clone(&self.log),
            );

            let err = match dispatcher.run(shutdown.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            self.log.record(OpEvent::ConnectionLost {
                reason: err.to_string(),
            });

            match backoff.on_failure(&err, started.elapsed()) {
                RetryDecision::GiveUp(class) => {
                    error!(?class, error = %err, "giving up on the device");
                    return Err(err);
                }
                RetryDecision::RetryAfter(delay) => {
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = backoff.attempt(),
                        "reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }
}
