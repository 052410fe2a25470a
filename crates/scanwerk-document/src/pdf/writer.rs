// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer: render scanned page images into a PDF using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`.

use std::path::{Path, PathBuf};

use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument};

const MM_PER_INCH: f32 = 25.4;

/// Renders scanned pages one image per page, sized from the scan resolution
/// so that a 300 dpi A4 scan produces an A4 page.
pub struct PdfWriter {
    /// Resolution the pages were scanned at.
    dpi: u32,
    /// Title metadata embedded in the PDF /Info dictionary.
    title: String,
}

impl PdfWriter {
    pub fn new(dpi: u32) -> Self {
        Self {
            dpi: dpi.max(1),
            title: "Scanwerk Scan".to_string(),
        }
    }

    /// Set a title for the PDF metadata.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Render every image, in order, into a single PDF.
    #[instrument(skip(self, pages), fields(pages = pages.len(), dpi = self.dpi))]
    pub fn render_pages(&self, pages: &[PathBuf]) -> Result<Vec<u8>> {
        if pages.is_empty() {
            return Err(ScanwerkError::Pdf("no pages to render".into()));
        }

        let mut doc = PdfDocument::new(&self.title);
        let mut pdf_pages = Vec::with_capacity(pages.len());
        let dpi = self.dpi as f32;

        for path in pages {
            let raw = load_rgb(path)?;
            let (width_px, height_px) = (raw.width as f32, raw.height as f32);
            let xobject_id = doc.add_image(&raw);

            let page_w = Mm(width_px / dpi * MM_PER_INCH);
            let page_h = Mm(height_px / dpi * MM_PER_INCH);

            let ops = vec![Op::UseXobject {
                id: xobject_id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(0.0)),
                    translate_y: Some(Pt(0.0)),
                    scale_x: None,
                    scale_y: None,
                    dpi: Some(dpi),
                    rotate: None,
                },
            }];
            debug!(page = %path.display(), width_mm = page_w.0, height_mm = page_h.0, "page placed");
            pdf_pages.push(PdfPage::new(page_w, page_h, ops));
        }

        doc.with_pages(pdf_pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        info!(bytes = output.len(), "rendered scan PDF");
        Ok(output)
    }

    /// Render and write straight to `path`.
    pub fn write_pages(&self, pages: &[PathBuf], path: &Path) -> Result<()> {
        let bytes = self.render_pages(pages)?;
        std::fs::write(path, &bytes).map_err(|e| {
            ScanwerkError::Resource(format!("cannot write {}: {e}", path.display()))
        })?;
        Ok(())
    }
}

fn load_rgb(path: &Path) -> Result<RawImage> {
    let decoded = ::image::open(path).map_err(|err| {
        ScanwerkError::Image(format!("failed to decode {}: {err}", path.display()))
    })?;
    let width = decoded.width() as usize;
    let height = decoded.height() as usize;
    Ok(RawImage {
        pixels: RawImageData::U8(decoded.to_rgb8().into_raw()),
        width,
        height,
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    })
}
