// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-core: types, errors, configuration and the operational log shared by every crate.

pub mod config;
pub mod error;
pub mod name_pattern;
pub mod telemetry;
pub mod types;

pub use config::AppConfig;
pub use error::ScanwerkError;
pub use name_pattern::NamePattern;
pub use telemetry::{MemoryLog, OpEvent, OperationalLog, TracingLog};
pub use types::*;
