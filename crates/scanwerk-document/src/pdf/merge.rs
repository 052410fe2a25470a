// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF concatenation: join per-page OCR PDFs, either with an external tool
// (`pdfunite`, `pdftk`) or in-process with `lopdf`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lopdf::{Document, Object, ObjectId};
use scanwerk_core::config::ConcatTool;
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument, warn};

use crate::process::ProcessStep;

/// Concatenates PDFs with the configured strategy.
#[derive(Debug, Clone)]
pub struct PdfMerger {
    tool: ConcatTool,
    timeout: Duration,
}

impl PdfMerger {
    pub fn new(tool: ConcatTool, timeout: Duration) -> Self {
        Self { tool, timeout }
    }

    /// Write the pages of `inputs`, in order, to `output`.
    #[instrument(skip(self, inputs), fields(tool = ?self.tool, inputs = inputs.len()))]
    pub async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(ScanwerkError::Pdf("nothing to concatenate".into()));
        }

        match self.tool {
            ConcatTool::Pdfunite => {
                let step = inputs
                    .iter()
                    .fold(ProcessStep::new("concat", "pdfunite", self.timeout), |s, p| {
                        s.path_arg(p)
                    })
                    .path_arg(output)
                    .produces(output);
                step.run().await
            }
            ConcatTool::Pdftk => {
                let step = inputs
                    .iter()
                    .fold(ProcessStep::new("concat", "pdftk", self.timeout), |s, p| {
                        s.path_arg(p)
                    })
                    .arg("cat")
                    .arg("output")
                    .path_arg(output)
                    .produces(output);
                step.run().await
            }
            ConcatTool::Builtin => {
                let inputs = inputs.to_vec();
                let output = output.to_path_buf();
                tokio::task::spawn_blocking(move || merge_files(&inputs, &output))
                    .await
                    .map_err(|e| ScanwerkError::Pdf(format!("merge task failed: {e}")))?
            }
        }
    }
}

/// Number of pages in a PDF on disk.
pub fn page_count(path: &Path) -> Result<usize> {
    let doc = load(path)?;
    Ok(doc.get_pages().len())
}

/// Merge `inputs` into one document at `output` using `lopdf`.
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| ScanwerkError::Pdf("nothing to merge".into()))?;

    let mut merged = load(first)?;
    for path in rest {
        let other = load(path)?;
        let other_pages = other.get_pages();
        let mut copied = BTreeMap::new();
        // get_pages is keyed by 1-based page number, so this is reading order.
        for page_id in other_pages.values() {
            append_page(&other, &mut merged, *page_id, &mut copied)?;
        }
        debug!(input = %path.display(), pages = other_pages.len(), "pages appended");
    }

    merged.compress();
    merged.save(output).map_err(|err| {
        ScanwerkError::Pdf(format!("failed to write {}: {err}", output.display()))
    })?;
    info!(output = %output.display(), pages = merged.get_pages().len(), "merged PDF written");
    Ok(())
}

fn load(path: &Path) -> Result<Document> {
    Document::load(path)
        .map_err(|err| ScanwerkError::Pdf(format!("failed to open {}: {err}", path.display())))
}

/// Copy one page (and everything it references) from `source` to the end of
/// `target`'s page tree.
fn append_page(
    source: &Document,
    target: &mut Document,
    page_id: ObjectId,
    copied: &mut BTreeMap<ObjectId, ObjectId>,
) -> Result<()> {
    let page_object = source.get_object(page_id).map_err(|err| {
        ScanwerkError::Pdf(format!("cannot read page object {page_id:?}: {err}"))
    })?;
    let cloned = deep_clone(source, target, page_object, copied)?;
    let cloned_id = target.add_object(cloned);

    let pages_id = match target
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .map_err(|err| ScanwerkError::Pdf(format!("no /Pages in target: {err}")))?
    {
        Object::Reference(id) => *id,
        _ => return Err(ScanwerkError::Pdf("/Pages is not a reference".into())),
    };

    if let Ok(Object::Dictionary(pages_dict)) = target.get_object_mut(pages_id) {
        if let Ok(Object::Array(kids)) = pages_dict.get_mut(b"Kids") {
            kids.push(Object::Reference(cloned_id));
        }
        if let Ok(Object::Integer(count)) = pages_dict.get_mut(b"Count") {
            *count += 1;
        }
    }
    if let Ok(Object::Dictionary(page_dict)) = target.get_object_mut(cloned_id) {
        page_dict.set("Parent", Object::Reference(pages_id));
    }
    Ok(())
}

/// Deep-clone an object, following references (except /Parent, which the
/// caller re-points). Each source object is copied at most once.
fn deep_clone(
    source: &Document,
    target: &mut Document,
    object: &Object,
    copied: &mut BTreeMap<ObjectId, ObjectId>,
) -> Result<Object> {
    match object {
        Object::Dictionary(dict) => {
            let mut new_dict = lopdf::Dictionary::new();
            for (key, value) in dict.iter() {
                if key == b"Parent" {
                    continue;
                }
                new_dict.set(key.clone(), deep_clone(source, target, value, copied)?);
            }
            Ok(Object::Dictionary(new_dict))
        }
        Object::Array(items) => {
            let mut new_items = Vec::with_capacity(items.len());
            for item in items {
                new_items.push(deep_clone(source, target, item, copied)?);
            }
            Ok(Object::Array(new_items))
        }
        Object::Reference(ref_id) => {
            if let Some(existing) = copied.get(ref_id) {
                return Ok(Object::Reference(*existing));
            }
            match source.get_object(*ref_id) {
                Ok(referenced) => {
                    // Reserve the id first so cycles resolve to it.
                    let new_id = target.add_object(Object::Null);
                    copied.insert(*ref_id, new_id);
                    let cloned = deep_clone(source, target, referenced, copied)?;
                    target.objects.insert(new_id, cloned);
                    Ok(Object::Reference(new_id))
                }
                Err(err) => {
                    warn!(?ref_id, %err, "cannot resolve reference, using Null");
                    Ok(Object::Null)
                }
            }
        }
        Object::Stream(stream) => {
            let mut new_dict = lopdf::Dictionary::new();
            for (key, value) in stream.dict.iter() {
                new_dict.set(key.clone(), deep_clone(source, target, value, copied)?);
            }
            Ok(Object::Stream(lopdf::Stream::new(
                new_dict,
                stream.content.clone(),
            )))
        }
        other => Ok(other.clone()),
    }
}
