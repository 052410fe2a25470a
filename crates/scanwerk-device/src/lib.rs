// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-device: talking to the scanner.
//
// `ledm` is the XML wire format, `api` the seam every other module goes
// through and `http` its reqwest implementation. On top of that sit
// registration, event polling, scan sessions and the dispatch loop, and the
// supervisor that reconnects when the device goes away.

pub mod api;
pub mod dispatcher;
pub mod events;
pub mod http;
pub mod ledm;
pub mod registrar;
pub mod retry;
pub mod session;
pub mod supervisor;

pub use api::{DeviceApi, PageStream};
pub use dispatcher::Dispatcher;
pub use events::{ChangeLedger, EventPoller, PollerMessage};
pub use http::HttpDevice;
pub use registrar::{DestinationMap, DeviceRegistrar};
pub use retry::RetryConfig;
pub use session::{ScanSessionController, SessionMessage, SessionPhase, SessionUpdate};
pub use supervisor::Supervisor;
