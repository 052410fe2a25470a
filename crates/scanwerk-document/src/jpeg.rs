// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JPEG height repair.
//
// Some scanners stream a page before they know how many lines it has and
// write 0xFFFF into the SOF0 line count. The real height arrives separately
// in the job description, so we patch the header while the bytes flow to disk.

use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;

use futures::{Stream, StreamExt};
use scanwerk_core::error::{Result, ScanwerkError};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Line count the firmware writes before the page is finished.
pub const SENTINEL_HEIGHT: u16 = 0xFFFF;

/// How far into the stream the baseline frame header may start.
pub const DEFAULT_HEADER_WINDOW: usize = 128 * 1024;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Still looking for SOF0; bytes are held in `header`.
    Header,
    /// Header emitted; everything else is copied through.
    Body,
}

/// Push-based, single-pass repairer.
///
/// Feed chunks in order with [`JpegRepair::feed`] and write out whatever it
/// returns, then call [`JpegRepair::finish`]. Only the bytes up to the end of
/// the frame header are ever buffered.
#[derive(Debug)]
pub struct JpegRepair {
    /// Height from the job description, if it reported a usable one.
    declared_height: Option<u16>,
    window: usize,
    phase: Phase,
    header: Vec<u8>,
    /// Offset of the next marker to inspect in `header`.
    cursor: usize,
    patched: bool,
}

impl JpegRepair {
    pub fn new(declared_height: Option<u16>) -> Self {
        Self::with_window(declared_height, DEFAULT_HEADER_WINDOW)
    }

    pub fn with_window(declared_height: Option<u16>, window: usize) -> Self {
        Self {
            declared_height,
            window,
            phase: Phase::Header,
            header: Vec::new(),
            cursor: 2,
            patched: false,
        }
    }

    /// Whether the sentinel height was replaced.
    pub fn patched(&self) -> bool {
        self.patched
    }

    /// Consume the next chunk, returning the bytes that are ready to write.
    pub fn feed<'a>(&mut self, chunk: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if self.phase == Phase::Body {
            return Ok(Cow::Borrowed(chunk));
        }

        self.header.extend_from_slice(chunk);
        if self.scan_header()? {
            self.phase = Phase::Body;
            return Ok(Cow::Owned(std::mem::take(&mut self.header)));
        }
        Ok(Cow::Borrowed(&[]))
    }

    /// Signal end of input. Fails if the frame header was never completed.
    pub fn finish(self) -> Result<()> {
        match self.phase {
            Phase::Body => Ok(()),
            Phase::Header => Err(ScanwerkError::Format(format!(
                "stream ended after {} bytes without a baseline frame header",
                self.header.len()
            ))),
        }
    }

    /// Walk the buffered markers. Returns `true` once SOF0 has been handled.
    fn scan_header(&mut self) -> Result<bool> {
        let buf = &mut self.header;
        if buf.len() < 2 {
            return Ok(false);
        }
        if buf[0] != 0xFF || buf[1] != SOI {
            return Err(ScanwerkError::Format(format!(
                "missing start-of-image marker (got {:02X} {:02X})",
                buf[0], buf[1]
            )));
        }

        loop {
            if self.cursor > self.window {
                return Err(ScanwerkError::Format(format!(
                    "no baseline frame header within the first {} bytes",
                    self.window
                )));
            }

            let pos = self.cursor;
            if buf.len() < pos + 2 {
                return Ok(false);
            }
            if buf[pos] != 0xFF {
                return Err(ScanwerkError::Format(format!(
                    "expected marker at offset {pos}, found {:02X}",
                    buf[pos]
                )));
            }
            let marker = buf[pos + 1];
            match marker {
                // Fill byte before the real marker.
                0xFF => {
                    self.cursor += 1;
                }
                SOF0 => {
                    // FF C0 | length(2) | precision(1) | lines(2) | ...
                    if buf.len() < pos + 7 {
                        return Ok(false);
                    }
                    let height = u16::from_be_bytes([buf[pos + 5], buf[pos + 6]]);
                    if height == SENTINEL_HEIGHT {
                        let declared = self
                            .declared_height
                            .filter(|h| *h != 0 && *h != SENTINEL_HEIGHT)
                            .ok_or_else(|| {
                                ScanwerkError::Format(format!(
                                    "sentinel line count at offset {pos} and no usable declared height ({:?})",
                                    self.declared_height
                                ))
                            })?;
                        let fixed = declared.to_be_bytes();
                        buf[pos + 5] = fixed[0];
                        buf[pos + 6] = fixed[1];
                        self.patched = true;
                        debug!(offset = pos, declared, "patched sentinel JPEG height");
                    }
                    return Ok(true);
                }
                SOS | EOI => {
                    return Err(ScanwerkError::Format(format!(
                        "marker {marker:02X} at offset {pos} precedes the baseline frame header"
                    )));
                }
                TEM | 0xD0..=0xD7 => {
                    self.cursor += 2;
                }
                _ => {
                    if buf.len() < pos + 4 {
                        return Ok(false);
                    }
                    let length = usize::from(u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]));
                    if length < 2 {
                        return Err(ScanwerkError::Format(format!(
                            "segment {marker:02X} at offset {pos} has invalid length {length}"
                        )));
                    }
                    self.cursor += 2 + length;
                }
            }
        }
    }
}

/// Repair a complete stream from `input` into `output`. Returns bytes written.
pub fn repair<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    declared_height: Option<u16>,
) -> Result<u64> {
    let mut repairer = JpegRepair::new(declared_height);
    let mut buf = [0u8; 8192];
    let mut written = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let ready = repairer.feed(&buf[..n])?;
        output.write_all(&ready)?;
        written += ready.len() as u64;
    }
    repairer.finish()?;
    output.flush()?;
    Ok(written)
}

/// Repair a chunked download straight into `path`. Returns bytes written.
///
/// The file is removed again if the stream or the repair fails.
pub async fn write_repaired<S>(
    mut chunks: S,
    declared_height: Option<u16>,
    path: &Path,
) -> Result<u64>
where
    S: Stream<Item = Result<Vec<u8>>> + Unpin,
{
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ScanwerkError::Resource(format!("cannot create {}: {e}", path.display())))?;

    let mut repairer = JpegRepair::new(declared_height);
    let mut written = 0u64;
    let result: Result<()> = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let ready = repairer.feed(&chunk)?;
            file.write_all(&ready).await?;
            written += ready.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    match result.and_then(|()| repairer.finish()) {
        Ok(()) => Ok(written),
        Err(e) => {
            drop(file);
            if let Err(rm) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %rm, "could not remove partial page");
            }
            Err(e)
        }
    }
}
