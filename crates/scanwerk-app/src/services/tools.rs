// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External tool availability.

use scanwerk_core::config::{AppConfig, OcrConfig};
use tracing::{debug, error, warn};

/// Programs the OCR chain needs that are not on `PATH`.
pub fn missing_programs(ocr: &OcrConfig) -> Vec<String> {
    ocr.required_programs()
        .into_iter()
        .filter(|program| match which::which(program) {
            Ok(path) => {
                debug!(program, path = %path.display(), "found tool");
                false
            }
            Err(_) => true,
        })
        .map(str::to_string)
        .collect()
}

/// Switch OCR off everywhere when a tool is missing. Returns whether any
/// destination still runs OCR.
pub fn check_ocr_tools(config: &mut AppConfig) -> bool {
    if !config.destinations.iter().any(|d| d.ocr) {
        return false;
    }
    let missing = missing_programs(&config.ocr);
    if missing.is_empty() {
        return true;
    }
    for program in &missing {
        error!(program = %program, "OCR tool not found on PATH");
    }
    warn!("OCR disabled for every destination");
    for destination in &mut config.destinations {
        destination.ocr = false;
    }
    false
}
