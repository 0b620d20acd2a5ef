use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::http::HeaderMap;
use pulse_core::errors::AdmissionError;
use pulse_core::ids::UserId;

/// Identity established by the external auth collaborator. The role is used
/// exactly once, as an admission check at connect time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: String,
}

/// Lookup from request headers to an authenticated caller. Session issuance
/// itself lives outside this subsystem; implementations only resolve an
/// already-issued credential.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Caller>;
}

/// Roles allowed to hold a live feed connection.
#[derive(Clone, Debug)]
pub struct RoleAllowList {
    roles: HashSet<String>,
}

impl RoleAllowList {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn admit(&self, caller: &Caller) -> Result<(), AdmissionError> {
        if self.roles.contains(&caller.role) {
            Ok(())
        } else {
            Err(AdmissionError::Forbidden(caller.role.clone()))
        }
    }
}

impl Default for RoleAllowList {
    fn default() -> Self {
        Self::new(["admin", "staff"])
    }
}

/// Bearer-token table for standalone deployments and tests.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, Caller>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        self.tokens.insert(
            token.into(),
            Caller {
                user_id: UserId::from_raw(user_id),
                role: role.into(),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Caller> {
        let token = headers
            .get(axum::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        self.tokens.get(token).cloned()
    }
}
