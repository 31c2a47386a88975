//! 任务轮询引擎
//!
//! Drives one generation job from submission to a terminal state. The
//! engine is a state machine over an injected [`AlarmScheduler`] and
//! [`Clock`]: [`JobPoller::on_alarm`] performs exactly one status fetch and
//! decides whether, and when, the next one happens.

pub mod adapter;

use std::cell::{Cell, RefCell};
use std::time::Duration;

use lexdraft_shared::chrono::{DateTime, Utc};
use lexdraft_shared::{ArtifactFormat, JobId, JobStatus, JobStatusResponse};

use crate::config::{
    DEFAULT_POLL_INITIAL_INTERVAL_MS, DEFAULT_POLL_INITIAL_PHASE_SECS,
    DEFAULT_POLL_LATER_INTERVAL_MS, DEFAULT_POLL_TIMEOUT_MS,
};
use crate::error::{DocError, DocErrorKind, DocResult};
use crate::template::{Artifact, RunTemplateParams, TemplateBackend};

pub use adapter::{AlarmScheduler, Clock, SystemClock, TokioAlarm};

// =========================================================
// 轮询参数
// =========================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    /// Interval while the job is young.
    pub initial_interval: Duration,
    pub later_interval: Duration,
    /// How long the short interval applies, measured from `start`.
    pub initial_phase: Duration,
    pub overall_timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(DEFAULT_POLL_INITIAL_INTERVAL_MS),
            later_interval: Duration::from_millis(DEFAULT_POLL_LATER_INTERVAL_MS),
            initial_phase: Duration::from_secs(DEFAULT_POLL_INITIAL_PHASE_SECS),
            overall_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

impl PollOptions {
    pub fn validate(&self) -> DocResult<()> {
        if self.initial_interval.is_zero() || self.later_interval.is_zero() {
            return Err(DocError::config("poll intervals must be greater than zero")
                .in_op("poll.validate"));
        }
        Ok(())
    }

    /// Delay before the next fetch, or `None` once the overall timeout is
    /// exceeded.
    pub fn next_delay(&self, elapsed: Duration) -> Option<Duration> {
        if elapsed > self.overall_timeout {
            None
        } else if elapsed < self.initial_phase {
            Some(self.initial_interval)
        } else {
            Some(self.later_interval)
        }
    }
}

// =========================================================
// 会话状态
// =========================================================

/// Why polling ended without a usable result.
#[derive(Debug, Clone, PartialEq)]
pub struct JobError {
    pub kind: DocErrorKind,
    /// Backend error code for failed jobs.
    pub code: Option<String>,
    pub message: String,
}

impl JobError {
    fn from_error(e: &DocError) -> Self {
        Self {
            kind: e.kind,
            code: None,
            message: e.message.clone(),
        }
    }

    pub fn to_error(&self) -> DocError {
        DocError::new(self.kind, self.message.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    /// Last status the backend reported; frozen once an error is set.
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub error: Option<JobError>,
    /// Completed status fetches.
    pub polls: u32,
    /// `false` once polling stopped for good.
    pub active: bool,
}

impl JobSnapshot {
    pub fn is_succeeded(&self) -> bool {
        self.error.is_none() && self.status == JobStatus::Succeeded
    }

    pub fn into_result(self) -> DocResult<JobSnapshot> {
        match &self.error {
            Some(e) => Err(e.to_error().in_op_with("poller.result", self.job_id.clone())),
            None => Ok(self),
        }
    }
}

struct Session {
    snapshot: JobSnapshot,
    generation: u64,
    started_at: DateTime<Utc>,
}

enum Next {
    Schedule(Duration),
    Stop,
}

type Listener = Box<dyn Fn(&JobSnapshot)>;

// =========================================================
// 业务逻辑层
// =========================================================

/// B: TemplateBackend
/// A: AlarmScheduler
/// K: Clock
pub struct JobPoller<B, A, K> {
    backend: B,
    alarm: A,
    clock: K,
    options: PollOptions,
    session: RefCell<Option<Session>>,
    generation: Cell<u64>,
    listener: Option<Listener>,
}

impl<B, A, K> JobPoller<B, A, K>
where
    B: TemplateBackend,
    A: AlarmScheduler,
    K: Clock,
{
    pub fn new(backend: B, alarm: A, clock: K, options: PollOptions) -> Self {
        Self {
            backend,
            alarm,
            clock,
            options,
            session: RefCell::new(None),
            generation: Cell::new(0),
            listener: None,
        }
    }

    /// Called after every state change of the current session.
    pub fn with_listener(mut self, listener: impl Fn(&JobSnapshot) + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.session.borrow().as_ref().map(|s| s.snapshot.clone())
    }

    fn notify(&self) {
        if let Some(listener) = &self.listener {
            if let Some(snapshot) = self.snapshot() {
                listener(&snapshot);
            }
        }
    }

    // --- 操作接口 ---

    /// Creates the job and starts polling it. Nothing is tracked if the
    /// backend refuses the submission.
    pub async fn submit(&self, code: &str, params: &RunTemplateParams) -> DocResult<JobId> {
        let job_id = self
            .backend
            .run(code, params)
            .await
            .map_err(|e| e.in_op("poller.submit"))?;
        self.start(&job_id).await?;
        Ok(job_id)
    }

    /// Single status fetch, outside any session.
    pub async fn poll(&self, job_id: &str) -> DocResult<JobStatusResponse> {
        self.backend
            .status(job_id)
            .await
            .map_err(|e| e.in_op_with("poller.poll", job_id))
    }

    /// Starts a new session for `job_id`, discarding the current one. The
    /// first fetch is due immediately.
    pub async fn start(&self, job_id: &str) -> DocResult<()> {
        let generation = self.generation.get().wrapping_add(1);
        self.generation.set(generation);

        *self.session.borrow_mut() = Some(Session {
            snapshot: JobSnapshot {
                job_id: job_id.to_string(),
                status: JobStatus::Queued,
                progress: None,
                error: None,
                polls: 0,
                active: true,
            },
            generation,
            started_at: self.clock.now(),
        });
        tracing::info!(job_id, "polling started");
        self.notify();

        // 立即开始
        self.alarm.set_alarm(Duration::ZERO).await
    }

    /// Discards the current session. A fetch already in flight is not
    /// interrupted, but its result is dropped.
    pub async fn cancel(&self) -> DocResult<()> {
        self.generation.set(self.generation.get().wrapping_add(1));
        if let Some(session) = self.session.borrow_mut().take() {
            tracing::info!(job_id = %session.snapshot.job_id, "polling cancelled");
        }
        self.alarm.delete_alarm().await
    }

    // --- Alarm 回调函数 ---

    /// One tick: fetch the status, update the session, arm the next alarm
    /// unless a terminal condition was reached.
    pub async fn on_alarm(&self) -> DocResult<()> {
        // 1. 僵尸检查
        let current = self.session.borrow().as_ref().and_then(|s| {
            s.snapshot
                .active
                .then(|| (s.snapshot.job_id.clone(), s.generation, s.started_at))
        });
        let Some((job_id, generation, started_at)) = current else {
            return self.alarm.delete_alarm().await;
        };

        // 2. 拉取状态
        let result = self.backend.status(&job_id).await;

        // 3. 过期检查: cancelled or restarted while the fetch was in flight
        if self.generation.get() != generation {
            tracing::debug!(job_id = %job_id, "dropping status of a discarded session");
            return Ok(());
        }

        let elapsed = (self.clock.now() - started_at)
            .to_std()
            .unwrap_or_default();

        // 4. 更新状态
        let next = {
            let mut guard = self.session.borrow_mut();
            let Some(session) = guard.as_mut() else {
                return Ok(());
            };
            let snapshot = &mut session.snapshot;
            snapshot.polls += 1;
            self.apply(snapshot, result, elapsed)
        };
        self.notify();

        // 5. 设置下一次 Alarm
        match next {
            Next::Schedule(delay) => {
                tracing::debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "next poll scheduled");
                self.alarm.set_alarm(delay).await
            }
            Next::Stop => Ok(()),
        }
    }

    fn apply(
        &self,
        snapshot: &mut JobSnapshot,
        result: DocResult<JobStatusResponse>,
        elapsed: Duration,
    ) -> Next {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(job_id = %snapshot.job_id, error = %e, "status fetch failed, polling stopped");
                snapshot.error = Some(JobError::from_error(&e));
                snapshot.active = false;
                return Next::Stop;
            }
        };

        snapshot.status = resp.status;
        snapshot.progress = resp.progress;
        tracing::debug!(
            job_id = %snapshot.job_id,
            status = %resp.status,
            progress = ?resp.progress,
            elapsed_ms = elapsed.as_millis() as u64,
            "job status"
        );

        if resp.status.is_terminal() {
            snapshot.active = false;
            if resp.status == JobStatus::Failed {
                let message = resp
                    .error_message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "generation failed".to_string());
                tracing::warn!(job_id = %snapshot.job_id, code = ?resp.error_code, %message, "job failed");
                snapshot.error = Some(JobError {
                    code: resp.error_code,
                    ..JobError::from_error(&DocError::job_failed(message))
                });
            } else {
                tracing::info!(job_id = %snapshot.job_id, polls = snapshot.polls, "job succeeded");
            }
            return Next::Stop;
        }

        match self.options.next_delay(elapsed) {
            Some(delay) => Next::Schedule(delay),
            None => {
                tracing::warn!(job_id = %snapshot.job_id, elapsed_ms = elapsed.as_millis() as u64, "polling timed out");
                snapshot.error = Some(JobError::from_error(&DocError::timeout(
                    "timed out waiting for the document",
                )));
                snapshot.active = false;
                Next::Stop
            }
        }
    }

    /// Drives the session until no alarm is armed, then returns its final
    /// state. `None` if the session was cancelled.
    pub async fn run(&self) -> Option<JobSnapshot> {
        while self.alarm.wait_alarm().await {
            if let Err(e) = self.on_alarm().await {
                // 调度失败同样终止会话
                tracing::error!(error = %e, "alarm scheduling failed");
                if let Some(session) = self.session.borrow_mut().as_mut() {
                    session.snapshot.error = Some(JobError::from_error(&e));
                    session.snapshot.active = false;
                }
                break;
            }
        }
        self.snapshot()
    }

    /// Fetches the artifact of a succeeded job. Any other state is
    /// `NotReady`, decided locally without a request.
    pub async fn download(&self, job_id: &str, format: ArtifactFormat) -> DocResult<Artifact> {
        let ready = self
            .session
            .borrow()
            .as_ref()
            .map(|s| s.snapshot.job_id == job_id && s.snapshot.is_succeeded())
            .unwrap_or(false);
        if !ready {
            return Err(DocError::not_ready("the document is not ready yet")
                .in_op_with("poller.download", job_id));
        }

        self.backend
            .download(job_id, format)
            .await
            .map_err(|e| e.in_op_with("poller.download", job_id))
    }
}
