//! 上传草稿模块
//!
//! The files and instruction a user is preparing for one template run.
//! Every file holds a preview handle from a [`PreviewRegistry`]; the draft
//! revokes handles on removal, on reset and when it is dropped, so the
//! registry never keeps handles for files that are gone.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use lexdraft_shared::ArtifactFormat;

use crate::error::{DocError, DocResult};
use crate::request::FilePart;
use crate::template::RunTemplateParams;

/// Extensions accepted by the document editor, with the MIME type sent for
/// each.
pub const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("pdf", ArtifactFormat::Pdf.mime_type()),
    ("doc", "application/msword"),
    ("docx", ArtifactFormat::Docx.mime_type()),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("txt", "text/plain"),
];

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// MIME type for an accepted extension.
pub fn mime_for(file_name: &str) -> Option<&'static str> {
    let ext = extension(file_name)?;
    ACCEPTED_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// A file is accepted when either its MIME type or its extension is.
pub fn is_accepted(file_name: &str, mime_type: &str) -> bool {
    ACCEPTED_TYPES.iter().any(|(_, m)| *m == mime_type) || mime_for(file_name).is_some()
}

/// "1.5 KB" style sizes for listings.
pub fn format_file_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    let rounded = (size * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

// =========================================================
// 预览句柄
// =========================================================

/// Issues and revokes preview handles.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    live: RefCell<HashSet<String>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> String {
        let handle = format!("preview:{}", uuid::Uuid::new_v4());
        self.live.borrow_mut().insert(handle.clone());
        handle
    }

    /// `true` if the handle was live.
    pub fn revoke(&self, handle: &str) -> bool {
        self.live.borrow_mut().remove(handle)
    }

    pub fn is_live(&self, handle: &str) -> bool {
        self.live.borrow().contains(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }
}

// =========================================================
// 草稿
// =========================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub id: String,
    pub part: FilePart,
    pub preview: String,
}

impl UploadedFile {
    pub fn name(&self) -> &str {
        &self.part.file_name
    }

    pub fn size(&self) -> usize {
        self.part.bytes.len()
    }

    pub fn is_image(&self) -> bool {
        self.part.mime_type.starts_with("image/")
    }
}

pub struct DocumentDraft {
    template_code: String,
    files: Vec<UploadedFile>,
    instruction: String,
    previews: Rc<PreviewRegistry>,
}

impl DocumentDraft {
    pub fn new(template_code: &str, previews: Rc<PreviewRegistry>) -> Self {
        Self {
            template_code: template_code.to_string(),
            files: Vec::new(),
            instruction: String::new(),
            previews,
        }
    }

    pub fn template_code(&self) -> &str {
        &self.template_code
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Nothing to submit: no files and a blank instruction.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.instruction.trim().is_empty()
    }

    pub fn add_file(&mut self, part: FilePart) -> DocResult<&UploadedFile> {
        if !is_accepted(&part.file_name, &part.mime_type) {
            return Err(DocError::validation(format!(
                "unsupported file type: {} ({})",
                part.file_name, part.mime_type
            ))
            .in_op("draft.add_file"));
        }
        let file = UploadedFile {
            id: uuid::Uuid::new_v4().to_string(),
            preview: self.previews.create(),
            part,
        };
        tracing::debug!(id = %file.id, name = %file.part.file_name, size = file.size(), "file added");
        self.files.push(file);
        Ok(&self.files[self.files.len() - 1])
    }

    /// Adds every accepted file and skips the rest; returns how many were
    /// added.
    pub fn add_files(&mut self, parts: impl IntoIterator<Item = FilePart>) -> usize {
        let mut added = 0;
        for part in parts {
            match self.add_file(part) {
                Ok(_) => added += 1,
                Err(e) => tracing::warn!(error = %e, "file skipped"),
            }
        }
        added
    }

    /// Reads a file from disk; the MIME type comes from its extension.
    pub fn add_path(&mut self, path: &Path) -> DocResult<&UploadedFile> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DocError::validation(format!("not a file path: {}", path.display()))
                    .in_op("draft.add_path")
            })?
            .to_string();
        let mime_type = mime_for(&file_name).ok_or_else(|| {
            DocError::validation(format!("unsupported file type: {}", file_name))
                .in_op_with("draft.add_path", path.display().to_string())
        })?;
        let bytes = std::fs::read(path).map_err(|e| {
            DocError::from(e).in_op_with("draft.add_path", path.display().to_string())
        })?;
        self.add_file(FilePart {
            file_name,
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    /// Removes a file and revokes its preview. `false` for an unknown id.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.files.iter().position(|f| f.id == id) else {
            return false;
        };
        let file = self.files.remove(index);
        self.previews.revoke(&file.preview);
        true
    }

    pub fn set_instruction(&mut self, instruction: &str) {
        self.instruction = instruction.to_string();
    }

    /// Drops every file (revoking previews) and clears the instruction.
    pub fn reset(&mut self) {
        for file in self.files.drain(..) {
            self.previews.revoke(&file.preview);
        }
        self.instruction.clear();
    }

    /// Parameters for submission. An empty draft is rejected here, before
    /// any request is built.
    pub fn to_params(&self) -> DocResult<RunTemplateParams> {
        if self.is_empty() {
            return Err(DocError::validation(
                "add at least one file or write an instruction",
            )
            .in_op_with("draft.to_params", self.template_code.clone()));
        }
        let instruction = self.instruction.trim();
        Ok(RunTemplateParams {
            files: self.files.iter().map(|f| f.part.clone()).collect(),
            instruction: (!instruction.is_empty()).then(|| instruction.to_string()),
        })
    }
}

impl Drop for DocumentDraft {
    fn drop(&mut self) {
        for file in &self.files {
            self.previews.revoke(&file.preview);
        }
    }
}
