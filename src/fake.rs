//! In-memory template backend.
//!
//! Implements [`TemplateBackend`] without a server. Job progress is a pure
//! function of the clock: one step every 300 ms, done after ten steps. Used
//! by `lexdraft generate --fake` and by the tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lexdraft_shared::chrono::{DateTime, Utc};
use lexdraft_shared::{ArtifactFormat, JobId, JobStatus, JobStatusResponse};

use crate::error::{DocError, DocResult};
use crate::poller::Clock;
use crate::template::{Artifact, RunTemplateParams, TemplateBackend, validate_template_code};

pub const FAKE_STEP: Duration = Duration::from_millis(300);
pub const FAKE_STEPS: u64 = 10;
const FAKE_INITIAL_PROGRESS: f64 = 0.05;
const FAKE_PROGRESS_PER_STEP: f64 = 0.09;
const FAKE_MAX_PROGRESS: f64 = 0.95;

struct FakeJob {
    code: String,
    created_at: DateTime<Utc>,
    /// (error_code, error_message)
    failure: Option<(String, String)>,
}

pub struct FakeTemplateBackend<K> {
    clock: K,
    jobs: RefCell<HashMap<JobId, FakeJob>>,
    rejection: RefCell<Option<(u16, String)>>,
    status_calls: Cell<usize>,
    download_calls: Cell<usize>,
}

impl<K: Clock> FakeTemplateBackend<K> {
    pub fn new(clock: K) -> Self {
        Self {
            clock,
            jobs: RefCell::new(HashMap::new()),
            rejection: RefCell::new(None),
            status_calls: Cell::new(0),
            download_calls: Cell::new(0),
        }
    }

    /// Makes a job report `failed` from now on.
    pub fn fail_job(&self, job_id: &str, code: &str, message: &str) -> bool {
        match self.jobs.borrow_mut().get_mut(job_id) {
            Some(job) => {
                job.failure = Some((code.to_string(), message.to_string()));
                true
            }
            None => false,
        }
    }

    /// The next `run` fails with a submission error carrying `status`.
    pub fn reject_next_submission(&self, status: u16, message: &str) {
        *self.rejection.borrow_mut() = Some((status, message.to_string()));
    }

    pub fn job_count(&self) -> usize {
        self.jobs.borrow().len()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.get()
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.get()
    }

    fn progress_at(step: u64) -> f64 {
        let raw = FAKE_INITIAL_PROGRESS + FAKE_PROGRESS_PER_STEP * step as f64;
        (raw.min(FAKE_MAX_PROGRESS) * 100.0).round() / 100.0
    }

    fn status_of(&self, job: &FakeJob) -> JobStatusResponse {
        if let Some((code, message)) = &job.failure {
            return JobStatusResponse::failed(code.as_str(), message.as_str());
        }
        let elapsed = (self.clock.now() - job.created_at)
            .to_std()
            .unwrap_or_default();
        let step = (elapsed.as_millis() / FAKE_STEP.as_millis()) as u64;
        if step >= FAKE_STEPS {
            JobStatusResponse::new(JobStatus::Succeeded).with_progress(1.0)
        } else {
            JobStatusResponse::new(JobStatus::Processing).with_progress(Self::progress_at(step))
        }
    }

    fn placeholder(code: &str, format: ArtifactFormat) -> Vec<u8> {
        match format {
            ArtifactFormat::Docx => {
                format!("Placeholder DOCX content for: {} (generated offline)", code).into_bytes()
            }
            ArtifactFormat::Pdf => format!("%PDF-1.4\n% Placeholder PDF for: {}\n", code).into_bytes(),
        }
    }
}

#[async_trait(?Send)]
impl<K: Clock> TemplateBackend for FakeTemplateBackend<K> {
    async fn run(&self, code: &str, params: &RunTemplateParams) -> DocResult<JobId> {
        validate_template_code(code).map_err(|e| e.in_op("fake.run"))?;
        if let Some((status, message)) = self.rejection.borrow_mut().take() {
            return Err(DocError::submission(status, message).in_op_with("fake.run", code));
        }

        let now = self.clock.now();
        let inputs = params.files.len() + usize::from(params.instruction().is_some());
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let job_id = format!("j_{}_{}_{}", now.timestamp_millis(), &nonce[..8], inputs);

        self.jobs.borrow_mut().insert(
            job_id.clone(),
            FakeJob {
                code: code.to_string(),
                created_at: now,
                failure: None,
            },
        );
        tracing::debug!(code, job_id = %job_id, inputs, "fake job created");
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> DocResult<JobStatusResponse> {
        self.status_calls.set(self.status_calls.get() + 1);
        let jobs = self.jobs.borrow();
        Ok(match jobs.get(job_id) {
            Some(job) => self.status_of(job),
            None => JobStatusResponse::failed("NOT_FOUND", "Job not found"),
        })
    }

    async fn download(&self, job_id: &str, format: ArtifactFormat) -> DocResult<Artifact> {
        self.download_calls.set(self.download_calls.get() + 1);
        let jobs = self.jobs.borrow();
        let job = jobs
            .get(job_id)
            .filter(|job| self.status_of(job).status == JobStatus::Succeeded)
            .ok_or_else(|| {
                DocError::not_ready("the document is not ready yet").in_op_with("fake.download", job_id)
            })?;

        Ok(Artifact {
            bytes: Self::placeholder(&job.code, format),
            filename: format!("{}.{}", job.code, format.extension()),
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocErrorKind;
    use crate::poller::adapter::tests::ManualClock;

    fn params() -> RunTemplateParams {
        RunTemplateParams {
            files: vec![],
            instruction: Some("claim for 50 000 RUB".to_string()),
        }
    }

    #[tokio::test]
    async fn test_progress_follows_clock() {
        let clock = ManualClock::new();
        let fake = FakeTemplateBackend::new(clock.clone());
        let job_id = fake.run("lawsuit", &params()).await.unwrap();
        assert!(job_id.ends_with("_1"));

        let status = fake.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.progress, Some(0.05));

        clock.advance(Duration::from_millis(1250));
        let status = fake.status(&job_id).await.unwrap();
        assert_eq!(status.progress, Some(0.41));

        clock.advance(Duration::from_millis(1700));
        let status = fake.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
        assert_eq!(status.progress, Some(0.86));

        clock.advance(Duration::from_millis(50));
        let status = fake.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Succeeded);
        assert_eq!(status.progress, Some(1.0));
        assert_eq!(fake.status_calls(), 4);
    }

    #[test]
    fn test_progress_is_capped() {
        for step in 0..FAKE_STEPS {
            let p = FakeTemplateBackend::<ManualClock>::progress_at(step);
            assert!(p <= FAKE_MAX_PROGRESS);
        }
        assert_eq!(FakeTemplateBackend::<ManualClock>::progress_at(20), 0.95);
    }

    #[tokio::test]
    async fn test_unknown_job_reports_not_found() {
        let fake = FakeTemplateBackend::new(ManualClock::new());
        let status = fake.status("missing").await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error_code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(status.error_message.as_deref(), Some("Job not found"));
    }

    #[tokio::test]
    async fn test_download_requires_success() {
        let clock = ManualClock::new();
        let fake = FakeTemplateBackend::new(clock.clone());
        let job_id = fake.run("share-sale", &params()).await.unwrap();

        let err = fake.download(&job_id, ArtifactFormat::Pdf).await.unwrap_err();
        assert_eq!(err.kind, DocErrorKind::NotReady);

        clock.advance(FAKE_STEP * FAKE_STEPS as u32);
        let pdf = fake.download(&job_id, ArtifactFormat::Pdf).await.unwrap();
        assert_eq!(pdf.filename, "share-sale.pdf");
        assert!(pdf.bytes.starts_with(b"%PDF"));
        let docx = fake.download(&job_id, ArtifactFormat::Docx).await.unwrap();
        assert_eq!(docx.filename, "share-sale.docx");
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let fake = FakeTemplateBackend::new(ManualClock::new());

        fake.reject_next_submission(429, "Too many requests");
        let err = fake.run("lawsuit", &params()).await.unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Submission { status: 429 });
        assert_eq!(fake.job_count(), 0);

        let job_id = fake.run("lawsuit", &params()).await.unwrap();
        assert!(fake.fail_job(&job_id, "TPL_RENDER", "render crashed"));
        assert!(!fake.fail_job("missing", "X", "y"));
        let status = fake.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error_message.as_deref(), Some("render crashed"));
    }
}
