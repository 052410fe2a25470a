// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-text extraction from hOCR output, used for the `.txt` index written
// next to OCR'd documents.

use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use scanwerk_core::error::{Result, ScanwerkError};

/// Extract recognised text, one output line per `ocr_line` (paragraphs and
/// other blocks also end a line).
pub fn extract_text(hocr: &str) -> Result<String> {
    let mut reader = Reader::from_str(hocr);
    reader.config_mut().check_end_names = false;

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_body = false;
    // One entry per open element: does closing it end a line?
    let mut open: Vec<bool> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"body" {
                    in_body = true;
                }
                open.push(is_line(&e));
            }
            Ok(Event::End(e)) => {
                if open.pop().unwrap_or(false) {
                    flush(&mut current, &mut lines);
                }
                if e.local_name().as_ref() == b"body" {
                    in_body = false;
                }
            }
            Ok(Event::Text(t)) if in_body => {
                let text = t
                    .unescape()
                    .map_err(|e| ScanwerkError::Protocol(format!("bad hOCR text: {e}")))?;
                push_words(&mut current, &text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ScanwerkError::Protocol(format!(
                    "malformed hOCR at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }
    flush(&mut current, &mut lines);
    Ok(lines.join("\n"))
}

/// Read an hOCR file and extract its text.
pub fn extract_text_from_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ScanwerkError::Resource(format!("cannot read {}: {e}", path.display())))?;
    extract_text(&raw)
}

fn is_line(e: &BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.local_name().as_ref() == b"class"
            && attr.value.split(|b| b.is_ascii_whitespace()).any(|class| {
                matches!(
                    class,
                    b"ocr_line" | b"ocr_caption" | b"ocr_textfloat" | b"ocr_header" | b"ocr_par"
                )
            })
    })
}

fn push_words(current: &mut String, text: &str) {
    for word in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
}

fn flush(current: &mut String, lines: &mut Vec<String>) {
    if !current.is_empty() {
        lines.push(std::mem::take(current));
    }
}
