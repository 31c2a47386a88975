//! Template job backend.
//!
//! [`TemplateBackend`] is the seam between the polling engine and whatever
//! actually runs the jobs: [`HttpTemplateBackend`] talks to the REST API,
//! [`FakeTemplateBackend`](crate::fake::FakeTemplateBackend) simulates it in
//! memory.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use async_trait::async_trait;
use lexdraft_shared::protocol::{
    HttpMethod, template_result_path, template_run_path, template_status_path,
};
use lexdraft_shared::{
    ArtifactFormat, FORM_FIELD_FILES, FORM_FIELD_INSTRUCTION, HEADER_CONTENT_DISPOSITION, JobId,
    JobStatusResponse, RunTemplateResponse,
};

use crate::client::ApiClient;
use crate::error::{DocError, DocErrorKind, DocResult};
use crate::request::{FilePart, HttpClient, HttpRequest, MultipartForm};
use crate::storage::KeyValueStore;

// =========================================================
// 核心抽象层
// =========================================================

/// Inputs of one generation run. Both parts are optional here; the upload
/// draft decides whether an empty run may be submitted at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTemplateParams {
    pub files: Vec<FilePart>,
    pub instruction: Option<String>,
}

impl RunTemplateParams {
    /// Instruction with surrounding whitespace removed, `None` when blank.
    pub fn instruction(&self) -> Option<&str> {
        self.instruction
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn to_form(&self) -> MultipartForm {
        let mut form = MultipartForm::new();
        for file in &self.files {
            form = form.add_file(FORM_FIELD_FILES, file.clone());
        }
        if let Some(instruction) = self.instruction() {
            form = form.add_text(FORM_FIELD_INSTRUCTION, instruction);
        }
        form
    }
}

/// A generated document.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub format: ArtifactFormat,
}

impl Artifact {
    /// Writes the artifact into `dir` and returns the full path.
    ///
    /// The filename comes from the server, so only its last path component
    /// is used and reserved characters are replaced.
    pub fn save_to(&self, dir: &Path) -> DocResult<PathBuf> {
        let path = dir.join(safe_filename(&self.filename, self.format));
        std::fs::write(&path, &self.bytes)
            .map_err(|e| DocError::from(e).in_op_with("artifact.save", path.display().to_string()))?;
        tracing::info!(path = %path.display(), bytes = self.bytes.len(), "artifact saved");
        Ok(path)
    }
}

fn safe_filename(name: &str, format: ArtifactFormat) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        format.default_filename()
    } else {
        cleaned.to_string()
    }
}

/// 文档生成后端接口
#[async_trait(?Send)]
pub trait TemplateBackend {
    /// Creates a job; the job exists only once this returns an id.
    async fn run(&self, code: &str, params: &RunTemplateParams) -> DocResult<JobId>;
    async fn status(&self, job_id: &str) -> DocResult<JobStatusResponse>;
    async fn download(&self, job_id: &str, format: ArtifactFormat) -> DocResult<Artifact>;
}

#[async_trait(?Send)]
impl<B: TemplateBackend + ?Sized> TemplateBackend for Rc<B> {
    async fn run(&self, code: &str, params: &RunTemplateParams) -> DocResult<JobId> {
        (**self).run(code, params).await
    }

    async fn status(&self, job_id: &str) -> DocResult<JobStatusResponse> {
        (**self).status(job_id).await
    }

    async fn download(&self, job_id: &str, format: ArtifactFormat) -> DocResult<Artifact> {
        (**self).download(job_id, format).await
    }
}

/// Template codes are URL path segments.
pub fn validate_template_code(code: &str) -> DocResult<()> {
    if code.is_empty() {
        return Err(DocError::validation("template code is empty"));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DocError::validation(format!(
            "template code {:?} may only contain letters, digits, '-' and '_'",
            code
        )));
    }
    Ok(())
}

/// Filename from a `Content-Disposition` header. `filename*` (RFC 5987)
/// wins over plain `filename`.
pub fn parse_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let value = value.trim().trim_matches('"');
                // charset'lang'percent-encoded
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    if !decoded.is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" => {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    plain = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

// =========================================================
// 实现层: REST 后端
// =========================================================

pub struct HttpTemplateBackend<C, S> {
    api: Rc<ApiClient<C, S>>,
}

impl<C: HttpClient, S: KeyValueStore> HttpTemplateBackend<C, S> {
    pub fn new(api: Rc<ApiClient<C, S>>) -> Self {
        Self { api }
    }
}

#[async_trait(?Send)]
impl<C: HttpClient, S: KeyValueStore> TemplateBackend for HttpTemplateBackend<C, S> {
    async fn run(&self, code: &str, params: &RunTemplateParams) -> DocResult<JobId> {
        validate_template_code(code).map_err(|e| e.in_op("template.run"))?;

        let req = HttpRequest::new(&self.api.url(&template_run_path(code)), HttpMethod::Post)
            .with_multipart(params.to_form());

        tracing::debug!(
            code,
            files = params.files.len(),
            has_instruction = params.instruction().is_some(),
            "submitting template job"
        );

        let resp = self.api.execute(req).await.map_err(|e| {
            let e = match e.kind {
                DocErrorKind::Http { status } => DocError::submission(status, e.message.clone())
                    .with_source(e),
                _ => e,
            };
            e.in_op_with("template.run", code)
        })?;

        let status = resp.status;
        let accepted: RunTemplateResponse = resp.json().map_err(|e| {
            DocError::submission(status, format!("unreadable submission response: {}", e.message))
                .with_source(e)
                .in_op_with("template.run", code)
        })?;
        if accepted.job_id.trim().is_empty() {
            return Err(DocError::submission(status, "backend returned an empty job id")
                .in_op_with("template.run", code));
        }

        tracing::info!(code, job_id = %accepted.job_id, status, "template job accepted");
        Ok(accepted.job_id)
    }

    async fn status(&self, job_id: &str) -> DocResult<JobStatusResponse> {
        let resp = self
            .api
            .request_bytes(&template_status_path(job_id))
            .await
            .map_err(|e| e.in_op_with("template.status", job_id))?;
        resp.json()
            .map_err(|e| e.in_op_with("template.status", job_id))
    }

    async fn download(&self, job_id: &str, format: ArtifactFormat) -> DocResult<Artifact> {
        let resp = self
            .api
            .request_bytes(&template_result_path(job_id, format))
            .await
            .map_err(|e| e.in_op_with("template.download", job_id))?;

        let filename = resp
            .header(HEADER_CONTENT_DISPOSITION)
            .and_then(parse_content_disposition)
            .unwrap_or_else(|| format.default_filename());

        Ok(Artifact {
            bytes: resp.body,
            filename,
            format,
        })
    }
}
