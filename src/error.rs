use std::fmt;

use serde::{Deserialize, Serialize};

// =========================================================
// 错误分类
// =========================================================

/// Error taxonomy of the client.
///
/// The kind decides how an error propagates: `Unauthorized` short-circuits
/// to the login redirect, everything else is surfaced as a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DocErrorKind {
    /// Bad input shape, rejected before any request is sent.
    #[error("invalid input")]
    Validation,
    /// Non-2xx response other than 401.
    #[error("request failed with status {status}")]
    Http { status: u16 },
    /// 401 from an authenticated call, or a call that needs a token without one.
    #[error("not authorized")]
    Unauthorized,
    /// Transport failure: DNS, connect, reset, body read.
    #[error("network unavailable")]
    Network,
    /// Artifact requested before the job succeeded.
    #[error("result is not ready yet")]
    NotReady,
    /// Polling exceeded the overall budget.
    #[error("timed out waiting for the job")]
    Timeout,
    /// The backend refused to create a job.
    #[error("job submission rejected with status {status}")]
    Submission { status: u16 },
    /// The backend reported the job as `failed`.
    #[error("document generation failed")]
    JobFailed,
    #[error("malformed payload")]
    Serialization,
    /// Credential persistence failed.
    #[error("local storage failure")]
    Storage,
    #[error("invalid configuration")]
    Config,
}

impl DocErrorKind {
    /// HTTP status behind the error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DocErrorKind::Http { status } | DocErrorKind::Submission { status } => Some(*status),
            DocErrorKind::Unauthorized => Some(401),
            _ => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            DocErrorKind::Validation => "VALIDATION_ERROR",
            DocErrorKind::Http { .. } => "HTTP_ERROR",
            DocErrorKind::Unauthorized => "UNAUTHORIZED",
            DocErrorKind::Network => "NETWORK_ERROR",
            DocErrorKind::NotReady => "NOT_READY",
            DocErrorKind::Timeout => "TIMEOUT",
            DocErrorKind::Submission { .. } => "SUBMISSION_ERROR",
            DocErrorKind::JobFailed => "JOB_FAILED",
            DocErrorKind::Serialization => "JSON_PARSE_ERROR",
            DocErrorKind::Storage => "STORAGE_ERROR",
            DocErrorKind::Config => "CONFIG_ERROR",
        }
    }
}

// =========================================================
// 错误上下文追踪
// =========================================================

/// One step of the operation trace attached to an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSpan {
    /// e.g. "api.request", "template.run"
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorSpan {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: None,
        }
    }

    pub fn with_detail(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            detail: Some(detail.into()),
        }
    }
}

// =========================================================
// 核心错误类型
// =========================================================

/// Client error: kind, message, optional source and an operation trace.
#[derive(Debug)]
pub struct DocError {
    pub kind: DocErrorKind,
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    spans: Vec<ErrorSpan>,
}

impl DocError {
    pub fn new(kind: DocErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            spans: Vec::new(),
        }
    }

    // --- Convenience constructors ---

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Validation, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Http { status }, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Unauthorized, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Network, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::NotReady, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Timeout, message)
    }

    pub fn submission(status: u16, message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Submission { status }, message)
    }

    pub fn job_failed(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::JobFailed, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Serialization, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Storage, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(DocErrorKind::Config, message)
    }

    // --- Context builders ---

    pub fn in_op(mut self, operation: impl Into<String>) -> Self {
        self.spans.push(ErrorSpan::new(operation));
        self
    }

    pub fn in_op_with(mut self, operation: impl Into<String>, detail: impl Into<String>) -> Self {
        self.spans.push(ErrorSpan::with_detail(operation, detail));
        self
    }

    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // --- Accessors ---

    pub fn status_code(&self) -> Option<u16> {
        self.kind.status_code()
    }

    pub fn error_code(&self) -> &'static str {
        self.kind.error_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn spans(&self) -> &[ErrorSpan] {
        &self.spans
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == DocErrorKind::Unauthorized
    }

    /// Text suitable for an inline form error or a notification.
    pub fn user_message(&self) -> String {
        match self.kind {
            DocErrorKind::Unauthorized => "Session expired, please sign in again".to_string(),
            DocErrorKind::Network => format!("Network error: {}", self.message),
            _ if self.message.is_empty() => self.kind.to_string(),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for DocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code(), self.message)?;

        if !self.spans.is_empty() {
            write!(f, " | trace: ")?;
            for (i, span) in self.spans.iter().enumerate() {
                if i > 0 {
                    write!(f, " -> ")?;
                }
                write!(f, "{}", span.operation)?;
                if let Some(detail) = &span.detail {
                    write!(f, "({})", detail)?;
                }
            }
        }
        Ok(())
    }
}

impl std::error::Error for DocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type DocResult<T> = std::result::Result<T, DocError>;

// =========================================================
// 类型转换实现
// =========================================================

impl From<serde_json::Error> for DocError {
    fn from(e: serde_json::Error) -> Self {
        DocError::serialization(e.to_string()).with_source(e)
    }
}

impl From<std::io::Error> for DocError {
    fn from(e: std::io::Error) -> Self {
        DocError::storage(e.to_string()).with_source(e)
    }
}

impl From<reqwest::Error> for DocError {
    fn from(e: reqwest::Error) -> Self {
        DocError::network(e.to_string()).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_trace() {
        let err = DocError::http(500, "boom")
            .in_op_with("api.request", "/v1/client/me")
            .in_op("account.profile");
        assert_eq!(
            err.to_string(),
            "[HTTP_ERROR] boom | trace: api.request(/v1/client/me) -> account.profile"
        );
        assert_eq!(err.status_code(), Some(500));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DocErrorKind::Unauthorized.status_code(), Some(401));
        assert_eq!(
            DocErrorKind::Submission { status: 422 }.status_code(),
            Some(422)
        );
        assert_eq!(DocErrorKind::Timeout.status_code(), None);
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            DocError::unauthorized("401").user_message(),
            "Session expired, please sign in again"
        );
        assert_eq!(DocError::not_ready("").user_message(), "result is not ready yet");
        assert_eq!(DocError::validation("add a file").user_message(), "add a file");
    }

    #[test]
    fn test_serde_error_keeps_source() {
        use std::error::Error;

        let err: DocError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind, DocErrorKind::Serialization);
        assert!(err.source().is_some());
    }
}
