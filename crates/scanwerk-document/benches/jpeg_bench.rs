// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the streaming JPEG height repair.

use std::io::Cursor;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{ImageFormat, RgbImage};

use scanwerk_document::JpegRepair;
use scanwerk_document::jpeg::{SENTINEL_HEIGHT, repair};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Encode a gradient page and overwrite its SOF0 height with the sentinel.
fn sentinel_page(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .expect("encode jpeg");

    let sof = bytes
        .windows(2)
        .position(|w| w == [0xFF, 0xC0])
        .expect("baseline frame header");
    let [hi, lo] = SENTINEL_HEIGHT.to_be_bytes();
    bytes[sof + 5] = hi;
    bytes[sof + 6] = lo;
    bytes
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Whole-stream repair of a small page through the `Read`/`Write` adapter.
fn bench_repair_stream(c: &mut Criterion) {
    let page = sentinel_page(620, 877);
    c.bench_function("repair (620x877, 8 KiB reads)", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(page.len());
            let n = repair(black_box(page.as_slice()), &mut out, Some(877)).expect("repair");
            black_box(n);
        });
    });
}

/// Worst case for the header buffer: one byte per chunk.
fn bench_repair_tiny_chunks(c: &mut Criterion) {
    let page = sentinel_page(64, 64);
    let header_len = 1024.min(page.len());
    c.bench_function("feed header byte-by-byte", |b| {
        b.iter(|| {
            let mut repairer = JpegRepair::new(Some(64));
            let mut emitted = 0usize;
            for byte in &page[..header_len] {
                emitted += repairer.feed(std::slice::from_ref(byte)).expect("feed").len();
            }
            black_box(emitted);
        });
    });
}

criterion_group!(benches, bench_repair_stream, bench_repair_tiny_chunks);
criterion_main!(benches);
