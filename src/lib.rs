//! Client SDK for the legal document generation service.
//!
//! Everything here is single-threaded: services share state through `Rc`
//! and expect a current-thread tokio runtime.

pub mod account;
pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fake;
pub mod poller;
pub mod request;
pub mod route;
pub mod session;
pub mod storage;
pub mod template;
pub mod upload;

pub use lexdraft_shared as shared;

pub use account::AccountService;
pub use auth::AuthService;
pub use client::ApiClient;
pub use config::{ClientConfig, EnvAdapter, ProcessEnv};
pub use credentials::CredentialStore;
pub use error::{DocError, DocErrorKind, DocResult};
pub use fake::FakeTemplateBackend;
pub use poller::{JobPoller, JobSnapshot, PollOptions};
pub use request::{FilePart, HttpClient, ReqwestHttpClient};
pub use route::AppRoute;
pub use session::{LogNavigator, Navigator, RedirectGuard};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use template::{Artifact, HttpTemplateBackend, RunTemplateParams, TemplateBackend};
pub use upload::{DocumentDraft, PreviewRegistry};
