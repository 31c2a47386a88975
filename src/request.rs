use async_trait::async_trait;
use lexdraft_shared::protocol::HttpMethod;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{DocError, DocResult};

#[cfg(test)]
use std::cell::RefCell;
#[cfg(test)]
use std::collections::VecDeque;

// =========================================================
// 核心抽象层 (HTTP Interface Abstraction)
// =========================================================

/// A file attached to a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultipartForm {
    /// (field name, file)
    pub files: Vec<(String, FilePart)>,
    /// (field name, value)
    pub fields: Vec<(String, String)>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(mut self, field: &str, part: FilePart) -> Self {
        self.files.push((field.to_string(), part));
        self
    }

    pub fn add_text(mut self, field: &str, value: &str) -> Self {
        self.fields.push((field.to_string(), value.to_string()));
        self
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(String),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(url: &str, method: HttpMethod) -> Self {
        Self {
            url: url.to_string(),
            method,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body.to_string()));
        self
    }

    pub fn with_multipart(mut self, form: MultipartForm) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Keys are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> DocResult<T> {
        serde_json::from_slice(&self.body).map_err(DocError::from)
    }
}

/// HTTP 客户端特性 (Trait)
///
/// `Err` is reserved for transport failures; any HTTP status, including
/// errors, comes back as `Ok(HttpResponse)`.
#[async_trait(?Send)]
pub trait HttpClient {
    async fn send(&self, req: HttpRequest) -> DocResult<HttpResponse>;
}

#[async_trait(?Send)]
impl<C: HttpClient + ?Sized> HttpClient for Rc<C> {
    async fn send(&self, req: HttpRequest) -> DocResult<HttpResponse> {
        (**self).send(req).await
    }
}

// =========================================================
// 实现层: reqwest 客户端 (Production)
// =========================================================

#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> DocResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocError::from(e).in_op("http.build_client"))?;
        Ok(Self { client })
    }
}

fn multipart_form(form: MultipartForm) -> DocResult<reqwest::multipart::Form> {
    let mut out = reqwest::multipart::Form::new();
    for (field, value) in form.fields {
        out = out.text(field, value);
    }
    for (field, file) in form.files {
        let part = reqwest::multipart::Part::bytes(file.bytes)
            .file_name(file.file_name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| {
                DocError::validation(format!("invalid MIME type {:?}", file.mime_type))
                    .with_source(e)
                    .in_op_with("http.multipart", file.file_name)
            })?;
        out = out.part(field, part);
    }
    Ok(out)
}

#[async_trait(?Send)]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, req: HttpRequest) -> DocResult<HttpResponse> {
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self.client.request(method, &req.url);

        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }

        match req.body {
            Some(RequestBody::Json(body)) => builder = builder.body(body),
            Some(RequestBody::Multipart(form)) => builder = builder.multipart(multipart_form(form)?),
            None => {}
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| DocError::from(e).in_op_with("http.send", req.url.clone()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| DocError::from(e).in_op_with("http.body", req.url.clone()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// =========================================================
// 测试工具: MockHttpClient
// =========================================================

#[cfg(test)]
pub enum MockReply {
    Response(HttpResponse),
    NetworkError(String),
}

#[cfg(test)]
pub struct MockHttpClient {
    // URL -> sticky reply
    responses: RefCell<HashMap<String, HttpResponse>>,
    // URL -> one-shot replies, consumed before the sticky one
    queued: RefCell<HashMap<String, VecDeque<MockReply>>>,
    pub requests: RefCell<Vec<HttpRequest>>,
}

#[cfg(test)]
impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            responses: RefCell::new(HashMap::new()),
            queued: RefCell::new(HashMap::new()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn mock_response(&self, url: &str, status: u16, body: serde_json::Value) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), HttpResponse::new(status, body.to_string()));
    }

    pub fn mock_raw(&self, url: &str, response: HttpResponse) {
        self.responses
            .borrow_mut()
            .insert(url.to_string(), response);
    }

    pub fn enqueue_response(&self, url: &str, status: u16, body: serde_json::Value) {
        self.queued
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(MockReply::Response(HttpResponse::new(
                status,
                body.to_string(),
            )));
    }

    pub fn enqueue_network_error(&self, url: &str, message: &str) {
        self.queued
            .borrow_mut()
            .entry(url.to_string())
            .or_default()
            .push_back(MockReply::NetworkError(message.to_string()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[cfg(test)]
#[async_trait(?Send)]
impl HttpClient for MockHttpClient {
    async fn send(&self, req: HttpRequest) -> DocResult<HttpResponse> {
        let url = req.url.clone();
        self.requests.borrow_mut().push(req);

        let queued = self
            .queued
            .borrow_mut()
            .get_mut(&url)
            .and_then(|q| q.pop_front());
        match queued {
            Some(MockReply::Response(resp)) => return Ok(resp),
            Some(MockReply::NetworkError(msg)) => return Err(DocError::network(msg)),
            None => {}
        }

        let responses = self.responses.borrow();
        if let Some(resp) = responses.get(&url) {
            Ok(resp.clone())
        } else {
            Ok(HttpResponse::new(404, "Not Found"))
        }
    }
}
