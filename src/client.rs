//! 认证请求封装
//!
//! Every backend call that needs a session goes through [`ApiClient`]: it
//! attaches the bearer token, maps statuses onto [`DocError`] kinds and
//! fires the login redirect on 401.

use std::rc::Rc;

use lexdraft_shared::protocol::{ApiRequest, HttpMethod};
use lexdraft_shared::{CONTENT_TYPE_JSON, HEADER_AUTHORIZATION, HEADER_CONTENT_TYPE, bearer};

use crate::credentials::CredentialStore;
use crate::error::{DocError, DocResult};
use crate::request::{HttpClient, HttpRequest, HttpResponse};
use crate::session::RedirectGuard;
use crate::storage::KeyValueStore;

pub struct ApiClient<C, S> {
    http: C,
    base_url: String,
    credentials: Rc<CredentialStore<S>>,
    guard: Rc<RedirectGuard>,
}

impl<C: HttpClient, S: KeyValueStore> ApiClient<C, S> {
    pub fn new(
        http: C,
        base_url: &str,
        credentials: Rc<CredentialStore<S>>,
        guard: Rc<RedirectGuard>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            guard,
        }
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn credentials(&self) -> &Rc<CredentialStore<S>> {
        &self.credentials
    }

    pub fn guard(&self) -> &Rc<RedirectGuard> {
        &self.guard
    }

    /// Builds the HTTP request for a typed endpoint.
    pub fn build<R: ApiRequest>(&self, body: &R) -> DocResult<HttpRequest> {
        let mut req = HttpRequest::new(&self.url(R::PATH), R::METHOD);
        if R::METHOD.has_body() {
            let value = serde_json::to_value(body)
                .map_err(|e| DocError::from(e).in_op_with("api.encode", R::PATH))?;
            req = req
                .with_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
                .with_json(value);
        }
        Ok(req)
    }

    /// Sends without a token and without status mapping. Used by the
    /// sign-in and sign-up calls, where a 401 means "wrong password" rather
    /// than "session expired".
    pub async fn send_public(&self, req: HttpRequest) -> DocResult<HttpResponse> {
        let url = req.url.clone();
        self.http
            .send(req)
            .await
            .map_err(|e| network_error(e).in_op_with("api.send", url))
    }

    /// **核心方法：带认证的请求**
    ///
    /// 流程：附加令牌 -> 发送 -> 401 跳转登录 -> 状态码映射
    pub async fn execute(&self, mut req: HttpRequest) -> DocResult<HttpResponse> {
        if let Some(token) = self.credentials.get_token() {
            req = req.with_header(HEADER_AUTHORIZATION, &bearer(&token));
        }

        let method = req.method;
        let url = req.url.clone();
        let resp = self
            .http
            .send(req)
            .await
            .map_err(|e| network_error(e).in_op_with("api.send", url.clone()))?;

        if resp.status == 401 {
            tracing::warn!(method = method.as_str(), url = %url, "unauthorized response");
            self.guard.redirect_to_login(&self.credentials);
            return Err(DocError::unauthorized("Unauthorized").in_op_with("api.execute", url));
        }

        if !resp.is_success() {
            let message = error_detail(&resp)
                .unwrap_or_else(|| format!("HTTP error! status: {}", resp.status));
            tracing::debug!(status = resp.status, url = %url, "request failed");
            return Err(DocError::http(resp.status, message).in_op_with("api.execute", url));
        }

        Ok(resp)
    }

    /// Typed JSON call.
    pub async fn request<R: ApiRequest>(&self, body: &R) -> DocResult<R::Response> {
        let req = self.build(body)?;
        let resp = self.execute(req).await?;
        resp.json::<R::Response>()
            .map_err(|e| e.in_op_with("api.decode", R::PATH))
    }

    /// Raw GET; the caller interprets the bytes.
    pub async fn request_bytes(&self, path: &str) -> DocResult<HttpResponse> {
        self.execute(HttpRequest::new(&self.url(path), HttpMethod::Get))
            .await
    }

    /// Only the status matters; the body is discarded.
    pub async fn request_status(&self, req: HttpRequest) -> DocResult<u16> {
        self.execute(req).await.map(|resp| resp.status)
    }
}

/// Transport errors keep their message but are always reported as
/// `Network`, whatever the transport classified them as.
fn network_error(e: DocError) -> DocError {
    if e.kind == crate::error::DocErrorKind::Network {
        e
    } else {
        DocError::network(e.message.clone()).with_source(e)
    }
}

/// `detail` (FastAPI) or `message` from a JSON error body.
pub(crate) fn error_detail(resp: &HttpResponse) -> Option<String> {
    let body: serde_json::Value = serde_json::from_slice(&resp.body).ok()?;
    let field = body.get("detail").or_else(|| body.get("message"))?;
    match field {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

// =========================================================
// 测试工具
// =========================================================
