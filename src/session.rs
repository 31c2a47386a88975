//! 会话守卫模块
//!
//! Owns the "redirect to login" side effect triggered by an unauthorized
//! response. The guard is shared by every request made through one
//! [`ApiClient`](crate::client::ApiClient), so concurrent 401s collapse into a
//! single redirect until a successful sign-in resets it.

use std::cell::Cell;

use crate::credentials::CredentialStore;
use crate::route::AppRoute;
use crate::storage::KeyValueStore;

/// 导航接口
///
/// What "go to this route" means depends on the surface: the CLI only
/// reports it, tests record it.
pub trait Navigator {
    fn navigate(&self, route: &AppRoute);
}

/// Reports navigations through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &AppRoute) {
        tracing::info!(route = %route, "navigation requested");
    }
}

pub struct RedirectGuard {
    /// 是否正在重定向
    redirecting: Cell<bool>,
    navigator: Box<dyn Navigator>,
}

impl RedirectGuard {
    pub fn new(navigator: impl Navigator + 'static) -> Self {
        Self {
            redirecting: Cell::new(false),
            navigator: Box::new(navigator),
        }
    }

    pub fn is_redirecting(&self) -> bool {
        self.redirecting.get()
    }

    /// Clears credentials and navigates to the login route, once.
    ///
    /// Returns `true` if this call performed the redirect.
    pub fn redirect_to_login<S: KeyValueStore>(&self, store: &CredentialStore<S>) -> bool {
        if self.redirecting.replace(true) {
            tracing::debug!("login redirect already in progress");
            return false;
        }

        if let Err(e) = store.clear_all() {
            // 凭据清理失败不阻止跳转
            tracing::warn!(error = %e, "failed to clear credentials before redirect");
        }
        tracing::info!("session expired, redirecting to login");
        self.navigator.navigate(&AppRoute::auth_failure_redirect());
        true
    }

    /// Arms the guard again; called after a successful sign-in.
    pub fn reset(&self) {
        self.redirecting.set(false);
    }
}

// =========================================================
// 测试工具
// =========================================================

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every navigation; clones share the same log.
    #[derive(Clone, Default)]
    pub struct RecordingNavigator {
        pub visited: Rc<RefCell<Vec<AppRoute>>>,
    }

    impl RecordingNavigator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn count(&self) -> usize {
            self.visited.borrow().len()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: &AppRoute) {
            self.visited.borrow_mut().push(route.clone());
        }
    }

    #[test]
    fn test_redirect_happens_once_until_reset() {
        let nav = RecordingNavigator::new();
        let guard = RedirectGuard::new(nav.clone());
        let store = CredentialStore::new(MemoryStorage::new());
        store.set_token("jwt").unwrap();

        assert!(guard.redirect_to_login(&store));
        assert!(!store.is_authenticated());
        assert!(!guard.redirect_to_login(&store));
        assert_eq!(nav.count(), 1);
        assert_eq!(nav.visited.borrow()[0], AppRoute::Login);

        guard.reset();
        assert!(!guard.is_redirecting());
        assert!(guard.redirect_to_login(&store));
        assert_eq!(nav.count(), 2);
    }
}
