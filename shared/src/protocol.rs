use crate::{
    ArtifactFormat, Balance, ChangePasswordRequest, LogoutRequest, NextBilling, PaymentLink,
    SignInRequest, SignInResponse, SignUpRequest, SignUpResponse, Subscription,
    SubscriptionLinkRequest, TopUpLinkRequest, UpdateProfileRequest, UserProfile,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// HTTP Methods for API Requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    /// GET requests never carry a JSON body.
    pub fn has_body(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

/// A trait that defines the request-response relationship and metadata for an API endpoint.
pub trait ApiRequest: Serialize + DeserializeOwned {
    /// The response type returned by this request.
    type Response: Serialize + DeserializeOwned;
    /// The URL path, relative to the API base URL.
    const PATH: &'static str;
    /// The HTTP method.
    const METHOD: HttpMethod;
}

// =========================================================
// Auth
// =========================================================

impl ApiRequest for SignInRequest {
    type Response = SignInResponse;
    const PATH: &'static str = "/v1/client/sign-in/password";
    const METHOD: HttpMethod = HttpMethod::Post;
}

impl ApiRequest for SignUpRequest {
    type Response = SignUpResponse;
    const PATH: &'static str = "/v1/client/sign-up";
    const METHOD: HttpMethod = HttpMethod::Post;
}

/// Logout only needs a 2xx; the body is ignored.
impl ApiRequest for LogoutRequest {
    type Response = serde_json::Value;
    const PATH: &'static str = "/v1/client/logout";
    const METHOD: HttpMethod = HttpMethod::Post;
}

// =========================================================
// Profile
// =========================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct GetProfileRequest;

impl ApiRequest for GetProfileRequest {
    type Response = UserProfile;
    const PATH: &'static str = "/v1/client/me";
    const METHOD: HttpMethod = HttpMethod::Get;
}

impl ApiRequest for ChangePasswordRequest {
    type Response = serde_json::Value;
    const PATH: &'static str = "/v1/client/change-password";
    const METHOD: HttpMethod = HttpMethod::Post;
}

impl ApiRequest for UpdateProfileRequest {
    type Response = UserProfile;
    const PATH: &'static str = "/v1/client/update";
    const METHOD: HttpMethod = HttpMethod::Patch;
}

// =========================================================
// Billing
// =========================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct GetSubscriptionRequest;

impl ApiRequest for GetSubscriptionRequest {
    type Response = Subscription;
    const PATH: &'static str = "/v1/billing/subscription";
    const METHOD: HttpMethod = HttpMethod::Get;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBalanceRequest;

impl ApiRequest for GetBalanceRequest {
    type Response = Balance;
    const PATH: &'static str = "/api/user/balance";
    const METHOD: HttpMethod = HttpMethod::Get;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetNextBillingRequest;

impl ApiRequest for GetNextBillingRequest {
    type Response = NextBilling;
    const PATH: &'static str = "/api/user/subscription/next-billing";
    const METHOD: HttpMethod = HttpMethod::Get;
}

impl ApiRequest for SubscriptionLinkRequest {
    type Response = PaymentLink;
    const PATH: &'static str = "/api/payment/create-subscription-link";
    const METHOD: HttpMethod = HttpMethod::Post;
}

impl ApiRequest for TopUpLinkRequest {
    type Response = PaymentLink;
    const PATH: &'static str = "/api/payment/create-topup-link";
    const METHOD: HttpMethod = HttpMethod::Post;
}

// =========================================================
// Template jobs (path-parameterized, not JSON request bodies)
// =========================================================

pub fn template_run_path(code: &str) -> String {
    format!("/api/tpl/{}/run", code)
}

pub fn template_status_path(job_id: &str) -> String {
    format!("/api/tpl/jobs/{}/status", job_id)
}

pub fn template_result_path(job_id: &str, format: ArtifactFormat) -> String {
    format!("/api/tpl/jobs/{}/result/{}", job_id, format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_paths() {
        assert_eq!(template_run_path("nda"), "/api/tpl/nda/run");
        assert_eq!(template_status_path("j1"), "/api/tpl/jobs/j1/status");
        assert_eq!(
            template_result_path("j1", ArtifactFormat::Pdf),
            "/api/tpl/jobs/j1/result/pdf"
        );
    }

    #[test]
    fn test_get_requests_have_no_body() {
        assert!(!GetProfileRequest::METHOD.has_body());
        assert!(UpdateProfileRequest::METHOD.has_body());
        assert_eq!(UpdateProfileRequest::METHOD.as_str(), "PATCH");
    }
}
