//! 认证模块
//!
//! Sign-in, registration and sign-out against the client API. Token
//! persistence goes through the shared [`CredentialStore`]; the redirect
//! guard is re-armed after every successful sign-in.

use std::rc::Rc;

use lexdraft_shared::{
    HEADER_AUTHORIZATION, LogoutRequest, SessionUser, SignInRequest, SignInResponse,
    SignUpRequest, SignUpResponse, bearer,
};

use crate::client::{ApiClient, error_detail};
use crate::credentials::CredentialStore;
use crate::error::{DocError, DocResult};
use crate::request::HttpClient;
use crate::storage::KeyValueStore;

pub struct AuthService<C, S> {
    api: Rc<ApiClient<C, S>>,
}

impl<C: HttpClient, S: KeyValueStore> AuthService<C, S> {
    pub fn new(api: Rc<ApiClient<C, S>>) -> Self {
        Self { api }
    }

    fn store(&self) -> &CredentialStore<S> {
        self.api.credentials()
    }

    /// 登录并保存凭据
    ///
    /// A rejected sign-in is an `Http` error carrying the backend's
    /// `detail`; it never triggers the login redirect.
    pub async fn sign_in(&self, email: &str, password: &str) -> DocResult<SignInResponse> {
        let req = self.api.build(&SignInRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        })?;
        let resp = self
            .api
            .send_public(req)
            .await
            .map_err(|e| e.in_op("auth.sign_in"))?;

        if !resp.is_success() {
            let message = error_detail(&resp)
                .unwrap_or_else(|| format!("sign-in failed: {}", resp.status));
            tracing::warn!(status = resp.status, "sign-in rejected");
            return Err(DocError::http(resp.status, message).in_op("auth.sign_in"));
        }

        let session: SignInResponse = resp.json().map_err(|e| e.in_op("auth.sign_in"))?;

        let store = self.store();
        if !session.jwt.is_empty() {
            store.set_token(&session.jwt)?;
        }
        if !session.refresh_token.is_empty() {
            store.set_refresh_token(&session.refresh_token)?;
        }
        store.set_user(&session.user)?;
        self.api.guard().reset();

        tracing::info!(user_id = %session.user.user_id, "signed in");
        Ok(session)
    }

    /// Registration never signs the user in.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> DocResult<SignUpResponse> {
        let req = self.api.build(&SignUpRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            full_name: full_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        })?;
        let resp = self
            .api
            .send_public(req)
            .await
            .map_err(|e| e.in_op("auth.sign_up"))?;

        if !resp.is_success() {
            let message = error_detail(&resp)
                .unwrap_or_else(|| format!("sign-up failed: {}", resp.status));
            return Err(DocError::http(resp.status, message).in_op("auth.sign_up"));
        }

        let created: SignUpResponse = resp.json().map_err(|e| e.in_op("auth.sign_up"))?;
        tracing::info!(user_id = %created.user.user_id, "account registered");
        Ok(created)
    }

    /// 注销并清除状态
    ///
    /// Local credentials are cleared whatever the backend answers.
    pub async fn sign_out(&self) -> DocResult<()> {
        let store = self.store();

        let Some(refresh_token) = store.get_refresh_token() else {
            tracing::debug!("no refresh token, local sign-out only");
            return store.clear_all();
        };

        match self.api.build(&LogoutRequest { refresh_token }) {
            Ok(mut req) => {
                if let Some(token) = store.get_token() {
                    req = req.with_header(HEADER_AUTHORIZATION, &bearer(&token));
                }
                match self.api.send_public(req).await {
                    Ok(resp) if resp.is_success() => tracing::info!("signed out"),
                    Ok(resp) => {
                        tracing::warn!(status = resp.status, body = %resp.text(), "logout failed")
                    }
                    Err(e) => tracing::warn!(error = %e, "logout request failed"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not build logout request"),
        }

        store.clear_all()
    }

    /// Cached user, only while a token is present.
    pub fn current_user(&self) -> Option<SessionUser> {
        let store = self.store();
        if !store.is_authenticated() {
            return None;
        }
        store.get_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store().is_authenticated()
    }
}
