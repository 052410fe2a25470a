// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Device errors --
    /// Network failure or unexpected HTTP status talking to the device.
    #[error("device transport error: {0}")]
    Transport(String),

    /// Unexpected or out-of-order event, malformed XML, unknown shortcut.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device is powering down")]
    PoweringDown,

    // -- Page processing errors --
    /// The JPEG stream does not have the expected structure.
    #[error("malformed JPEG stream: {0}")]
    Format(String),

    #[error("pipeline step `{step}` failed: {detail}")]
    PipelineStep { step: String, detail: String },

    #[error("PDF operation failed: {0}")]
    Pdf(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Filesystem / configuration --
    #[error("resource error: {0}")]
    Resource(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid name pattern: {0}")]
    PatternToken(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanwerkError {
    pub fn step(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::PipelineStep {
            step: step.into(),
            detail: detail.into(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
