//! 路由定义模块 - 领域模型
//!
//! Client-visible routes. Pure data, no I/O: the navigator decides what a
//! navigation actually does.

use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AppRoute {
    /// Template catalog (home)
    #[default]
    Catalog,
    /// Document editor for one template code
    TemplateEditor(String),
    Pricing,
    /// Profile, subscription and balance
    Account,
    Login,
    Register,
    NotFound,
}

impl AppRoute {
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        match path {
            "/" => Self::Catalog,
            "/pricing" => Self::Pricing,
            "/account" => Self::Account,
            "/login" => Self::Login,
            "/register" => Self::Register,
            _ => match path.strip_prefix("/tpl/") {
                Some(code) if !code.is_empty() && !code.contains('/') => {
                    Self::TemplateEditor(code.to_string())
                }
                _ => Self::NotFound,
            },
        }
    }

    pub fn to_path(&self) -> String {
        match self {
            Self::Catalog => "/".to_string(),
            Self::TemplateEditor(code) => format!("/tpl/{}", code),
            Self::Pricing => "/pricing".to_string(),
            Self::Account => "/account".to_string(),
            Self::Login => "/login".to_string(),
            Self::Register => "/register".to_string(),
            Self::NotFound => "/404".to_string(),
        }
    }

    /// **核心守卫逻辑：定义该路由是否需要认证**
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::TemplateEditor(_) | Self::Account)
    }

    /// Signed-in users are sent away from these.
    pub fn should_redirect_when_authenticated(&self) -> bool {
        matches!(self, Self::Login | Self::Register)
    }

    /// Where an unauthorized response sends the user.
    pub fn auth_failure_redirect() -> Self {
        Self::Login
    }

    pub fn auth_success_redirect() -> Self {
        Self::Catalog
    }

    /// Registration does not sign in; it lands on the login page.
    pub fn registration_redirect() -> Self {
        Self::Login
    }
}

impl Display for AppRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_roundtrip() {
        let routes = [
            AppRoute::Catalog,
            AppRoute::TemplateEditor("lawsuit".to_string()),
            AppRoute::Pricing,
            AppRoute::Account,
            AppRoute::Login,
            AppRoute::Register,
        ];
        for route in routes {
            assert_eq!(AppRoute::from_path(&route.to_path()), route);
        }
    }

    #[test]
    fn test_unknown_paths() {
        assert_eq!(AppRoute::from_path("/tpl/"), AppRoute::NotFound);
        assert_eq!(AppRoute::from_path("/tpl/a/b"), AppRoute::NotFound);
        assert_eq!(AppRoute::from_path("/vault"), AppRoute::NotFound);
        assert_eq!(AppRoute::from_path("/login?next=/account"), AppRoute::Login);
    }

    #[test]
    fn test_guards() {
        assert!(AppRoute::TemplateEditor("nda".into()).requires_auth());
        assert!(AppRoute::Account.requires_auth());
        assert!(!AppRoute::Catalog.requires_auth());
        assert!(AppRoute::Login.should_redirect_when_authenticated());
        assert_eq!(AppRoute::auth_failure_redirect(), AppRoute::Login);
    }
}
