use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod cost;
pub mod protocol;

pub use chrono;
use chrono::{DateTime, Utc};

// =========================================================
// 常量定义 (Constants)
// =========================================================

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Multipart field names expected by `POST /api/tpl/{code}/run`.
pub const FORM_FIELD_FILES: &str = "files[]";
pub const FORM_FIELD_INSTRUCTION: &str = "instruction";

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

// =========================================================
// 文档生成任务 (Template Jobs)
// =========================================================

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// `succeeded` and `failed` never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `202 Accepted` body of the run endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTemplateResponse {
    pub job_id: JobId,
}

/// Body of `GET /api/tpl/jobs/{job_id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    /// 0..=1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobStatusResponse {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Docx,
    Pdf,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Docx => "docx",
            ArtifactFormat::Pdf => "pdf",
        }
    }

    pub const fn mime_type(&self) -> &'static str {
        match self {
            ArtifactFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            ArtifactFormat::Pdf => "application/pdf",
        }
    }

    /// Name used when the backend sends no `Content-Disposition`.
    pub fn default_filename(&self) -> String {
        format!("document.{}", self.extension())
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docx" => Ok(ArtifactFormat::Docx),
            "pdf" => Ok(ArtifactFormat::Pdf),
            other => Err(format!("unsupported artifact format: {}", other)),
        }
    }
}

// =========================================================
// 认证 (Auth)
// =========================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// The user object embedded in sign-in responses and cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub orgs: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInResponse {
    pub jwt: String,
    pub refresh_token: String,
    pub user: SessionUser,
}

pub type SignUpResponse = SignInResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

// =========================================================
// 用户资料 (Profile)
// =========================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tariff: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kc_linked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<UserMetadata>,
}

/// Wire body of the change-password call; the backend names the current
/// password `old_password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: String,
}

// =========================================================
// 订阅与计费 (Billing)
// =========================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffPlan {
    pub plan_code: String,
    pub name: String,
    pub monthly_units: f64,
    pub price_rub: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_code: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub auto_renew: bool,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub remaining_units: f64,
    pub next_debit: DateTime<Utc>,
    #[serde(default)]
    pub tariff_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<TariffPlan>,
}

impl Subscription {
    /// Projects the flattened `remaining_units` onto the canonical balance shape.
    pub fn balance(&self) -> Balance {
        Balance {
            user_id: self.user_id.clone(),
            balance_units: self.remaining_units,
            updated_at: self.created_at,
        }
    }

    pub fn next_billing(&self) -> NextBilling {
        NextBilling {
            next_billing_date: self.next_debit,
            amount: self.plan.as_ref().map(|p| p.price_rub).unwrap_or(0.0),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

pub const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: String,
    pub balance_units: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextBilling {
    pub next_billing_date: DateTime<Utc>,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubscriptionLinkRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpLinkRequest {
    pub units: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub payment_url: String,
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_response_optional_fields() {
        let res: JobStatusResponse = serde_json::from_value(json!({ "status": "queued" })).unwrap();
        assert_eq!(res.status, JobStatus::Queued);
        assert!(res.progress.is_none());
        assert!(res.error_code.is_none());

        let res: JobStatusResponse = serde_json::from_value(json!({
            "status": "failed",
            "error_code": "TPL_RENDER",
            "error_message": "render crashed"
        }))
        .unwrap();
        assert_eq!(res.status, JobStatus::Failed);
        assert_eq!(res.error_message.as_deref(), Some("render crashed"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_artifact_format_parse() {
        assert_eq!("PDF".parse::<ArtifactFormat>(), Ok(ArtifactFormat::Pdf));
        assert_eq!("docx".parse::<ArtifactFormat>(), Ok(ArtifactFormat::Docx));
        assert!("odt".parse::<ArtifactFormat>().is_err());
        assert_eq!(ArtifactFormat::Pdf.default_filename(), "document.pdf");
    }

    #[test]
    fn test_subscription_projections() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "user_id": "user123",
            "plan_code": "pro1500",
            "started_at": "2024-01-15T10:30:00Z",
            "expires_at": "2024-02-15T10:30:00Z",
            "auto_renew": true,
            "status": "active",
            "created_at": "2024-01-15T10:30:00Z",
            "remaining_units": 1250.5,
            "next_debit": "2024-02-15T10:30:00Z",
            "plan": {
                "plan_code": "pro1500",
                "name": "Pro Plan",
                "monthly_units": 1500.0,
                "price_rub": 1500,
                "is_active": true,
                "created_at": "2024-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        let balance = sub.balance();
        assert_eq!(balance.balance_units, 1250.5);
        assert_eq!(balance.user_id, "user123");

        let next = sub.next_billing();
        assert_eq!(next.amount, 1500.0);
        assert_eq!(next.currency, "RUB");
        assert_eq!(next.next_billing_date, sub.next_debit);
    }
}
