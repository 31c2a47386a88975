//! Profile and billing services.
//!
//! Thin typed wrappers over [`ApiClient::request`]. Every call needs a
//! session: without an access token they fail with `Unauthorized` before
//! anything is sent.

use std::rc::Rc;

use lexdraft_shared::protocol::{
    GetBalanceRequest, GetNextBillingRequest, GetProfileRequest, GetSubscriptionRequest,
};
use lexdraft_shared::{
    Balance, ChangePasswordRequest, NextBilling, PaymentLink, SessionUser, Subscription,
    SubscriptionLinkRequest, TopUpLinkRequest, UpdateProfileRequest, UserProfile,
};

use crate::client::ApiClient;
use crate::error::{DocError, DocResult};
use crate::request::HttpClient;
use crate::storage::KeyValueStore;

pub struct AccountService<C, S> {
    api: Rc<ApiClient<C, S>>,
}

impl<C: HttpClient, S: KeyValueStore> AccountService<C, S> {
    pub fn new(api: Rc<ApiClient<C, S>>) -> Self {
        Self { api }
    }

    fn require_session(&self, op: &'static str) -> DocResult<()> {
        if self.api.credentials().is_authenticated() {
            Ok(())
        } else {
            Err(DocError::unauthorized("no access token, sign in first").in_op(op))
        }
    }

    /// Keeps the cached session user in step with the profile. Organization
    /// memberships only come from sign-in, so they are carried over.
    fn cache_profile(&self, profile: &UserProfile) {
        let store = self.api.credentials();
        let orgs = store
            .get_user::<SessionUser>()
            .map(|u| u.orgs)
            .unwrap_or_default();
        let user = SessionUser {
            user_id: profile.id.clone(),
            email: profile.email.clone(),
            full_name: profile.full_name.clone(),
            orgs,
        };
        if let Err(e) = store.set_user(&user) {
            tracing::warn!(error = %e, "failed to cache user profile");
        }
    }

    // =========================================================
    // 用户资料
    // =========================================================

    pub async fn profile(&self) -> DocResult<UserProfile> {
        self.require_session("account.profile")?;
        let profile = self
            .api
            .request(&GetProfileRequest)
            .await
            .map_err(|e| e.in_op("account.profile"))?;
        self.cache_profile(&profile);
        Ok(profile)
    }

    pub async fn change_password(&self, current: &str, new: &str) -> DocResult<()> {
        self.require_session("account.change_password")?;
        if new.is_empty() {
            return Err(DocError::validation("new password must not be empty"));
        }
        self.api
            .request(&ChangePasswordRequest {
                old_password: current.to_string(),
                new_password: new.to_string(),
            })
            .await
            .map_err(|e| e.in_op("account.change_password"))?;
        tracing::info!("password changed");
        Ok(())
    }

    pub async fn update_profile(&self, full_name: &str) -> DocResult<UserProfile> {
        self.require_session("account.update_profile")?;
        let profile = self
            .api
            .request(&UpdateProfileRequest {
                full_name: full_name.trim().to_string(),
            })
            .await
            .map_err(|e| e.in_op("account.update_profile"))?;
        self.cache_profile(&profile);
        Ok(profile)
    }

    // =========================================================
    // 订阅与计费
    // =========================================================

    pub async fn subscription(&self) -> DocResult<Subscription> {
        self.require_session("account.subscription")?;
        self.api
            .request(&GetSubscriptionRequest)
            .await
            .map_err(|e| e.in_op("account.subscription"))
    }

    pub async fn balance(&self) -> DocResult<Balance> {
        self.require_session("account.balance")?;
        self.api
            .request(&GetBalanceRequest)
            .await
            .map_err(|e| e.in_op("account.balance"))
    }

    pub async fn next_billing(&self) -> DocResult<NextBilling> {
        self.require_session("account.next_billing")?;
        self.api
            .request(&GetNextBillingRequest)
            .await
            .map_err(|e| e.in_op("account.next_billing"))
    }

    /// Payment link for renewing (or switching to) a plan.
    pub async fn create_subscription_link(&self, plan_code: Option<&str>) -> DocResult<PaymentLink> {
        self.require_session("account.create_subscription_link")?;
        let link = self
            .api
            .request(&SubscriptionLinkRequest {
                plan_code: plan_code.map(str::to_string),
            })
            .await
            .map_err(|e| e.in_op("account.create_subscription_link"))?;
        tracing::info!(order_id = %link.order_id, "subscription payment link issued");
        Ok(link)
    }

    pub async fn create_topup_link(&self, units: u32) -> DocResult<PaymentLink> {
        if units == 0 {
            return Err(DocError::validation("top-up amount must be at least one unit")
                .in_op("account.create_topup_link"));
        }
        self.require_session("account.create_topup_link")?;
        let link = self
            .api
            .request(&TopUpLinkRequest { units })
            .await
            .map_err(|e| e.in_op_with("account.create_topup_link", units.to_string()))?;
        tracing::info!(order_id = %link.order_id, units, "top-up payment link issued");
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{fixture, profile_json, url};
    use crate::error::DocErrorKind;
    use crate::request::RequestBody;
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_requires_token_before_any_request() {
        let f = fixture();
        let account = AccountService::new(f.client.clone());

        let err = account.profile().await.unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Unauthorized);
        assert_eq!(f.http.request_count(), 0);
        // no response was seen, so no redirect either
        assert_eq!(f.navigator.count(), 0);
    }

    #[tokio::test]
    async fn test_profile_caches_user_and_keeps_orgs() {
        let f = fixture();
        let store = f.client.credentials();
        store.set_token("jwt").unwrap();
        store
            .set_user(&SessionUser {
                user_id: "u-1".into(),
                email: "old@lawfirm.ru".into(),
                full_name: None,
                orgs: vec![json!({"id": "org-1"})],
            })
            .unwrap();
        f.http.mock_response(&url("/v1/client/me"), 200, profile_json());

        let account = AccountService::new(f.client.clone());
        let profile = account.profile().await.unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Alexander Petrov"));

        let cached: SessionUser = store.get_user().unwrap();
        assert_eq!(cached.email, "alexander@lawfirm.ru");
        assert_eq!(cached.orgs.len(), 1);
    }

    #[tokio::test]
    async fn test_change_password_sends_old_password_field() {
        let f = fixture();
        f.client.credentials().set_token("jwt").unwrap();
        f.http.mock_response(
            &url("/v1/client/change-password"),
            200,
            json!({"success": true}),
        );

        let account = AccountService::new(f.client.clone());
        account.change_password("old-pw", "new-pw").await.unwrap();

        let sent = &f.http.requests.borrow()[0];
        let Some(RequestBody::Json(body)) = &sent.body else {
            panic!("expected JSON body");
        };
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body, json!({"old_password": "old-pw", "new_password": "new-pw"}));
    }

    #[tokio::test]
    async fn test_update_profile_uses_patch() {
        let f = fixture();
        f.client.credentials().set_token("jwt").unwrap();
        let mut updated = profile_json();
        updated["full_name"] = json!("A. Petrov");
        f.http.mock_response(&url("/v1/client/update"), 200, updated);

        let account = AccountService::new(f.client.clone());
        let profile = account.update_profile(" A. Petrov ").await.unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("A. Petrov"));
        assert_eq!(
            f.http.requests.borrow()[0].method,
            lexdraft_shared::protocol::HttpMethod::Patch
        );
        let cached: SessionUser = f.client.credentials().get_user().unwrap();
        assert_eq!(cached.full_name.as_deref(), Some("A. Petrov"));
    }

    #[tokio::test]
    async fn test_billing_endpoints() {
        let f = fixture();
        f.client.credentials().set_token("jwt").unwrap();
        f.http.mock_response(
            &url("/api/user/balance"),
            200,
            json!({"user_id": "u-1", "balance_units": 1250.5, "updated_at": "2024-01-15T10:30:00Z"}),
        );
        f.http.mock_response(
            &url("/api/user/subscription/next-billing"),
            200,
            json!({"next_billing_date": "2024-02-15T10:30:00Z", "amount": 1500.0, "currency": "RUB"}),
        );
        f.http.mock_response(
            &url("/api/payment/create-subscription-link"),
            200,
            json!({"payment_url": "https://pay.example.ru/o/1", "order_id": "order_1"}),
        );

        let account = AccountService::new(f.client.clone());
        assert_eq!(account.balance().await.unwrap().balance_units, 1250.5);
        assert_eq!(account.next_billing().await.unwrap().currency, "RUB");
        let link = account
            .create_subscription_link(Some("pro1500"))
            .await
            .unwrap();
        assert_eq!(link.order_id, "order_1");
    }

    #[tokio::test]
    async fn test_topup_rejects_zero_units() {
        let f = fixture();
        f.client.credentials().set_token("jwt").unwrap();
        let account = AccountService::new(f.client.clone());

        let err = account.create_topup_link(0).await.unwrap_err();
        assert_eq!(err.kind, DocErrorKind::Validation);
        assert_eq!(f.http.request_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_on_billing_redirects() {
        let f = fixture();
        f.client.credentials().set_token("expired").unwrap();
        f.http
            .mock_response(&url("/v1/billing/subscription"), 401, json!({}));

        let account = AccountService::new(f.client.clone());
        let err = account.subscription().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(f.navigator.count(), 1);
        assert!(!f.client.credentials().is_authenticated());
    }
}
