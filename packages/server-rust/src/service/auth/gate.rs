//! Authorization gate run for every call after backend lookup.

use std::collections::HashSet;

use gantry_core::{DispatchError, DispatchResult, Identity};
use serde::{Deserialize, Serialize};

use super::token::TokenHandler;

/// What happens to calls that are not in the anonymous set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    /// Every call passes without identity.
    Allow,
    /// Calls need a valid token unless the method is anonymous.
    #[default]
    Deny,
}

/// Decides whether a call may proceed and with which identity.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationGate {
    policy: DefaultPolicy,
    anonymous: HashSet<String>,
    handler: Option<TokenHandler>,
}

impl AuthorizationGate {
    #[must_use]
    pub fn new(policy: DefaultPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Adds fully qualified `backend.endpoint.operation` names that never need a token.
    #[must_use]
    pub fn with_anonymous<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.anonymous.extend(methods.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_handler(mut self, handler: TokenHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn policy(&self) -> DefaultPolicy {
        self.policy
    }

    #[must_use]
    pub fn token_handler(&self) -> Option<&TokenHandler> {
        self.handler.as_ref()
    }

    #[must_use]
    pub fn is_anonymous(&self, method: &str) -> bool {
        self.anonymous.contains(method)
    }

    /// Authorizes a call to `method` carrying `token`.
    ///
    /// Returns `Ok(None)` for calls admitted without identity.
    ///
    /// # Errors
    ///
    /// - `AuthorizationUnavailable` when no token handler is configured.
    /// - `InvalidToken` when a token is required but empty, or rejected.
    pub async fn authorize(&self, method: &str, token: &str) -> DispatchResult<Option<Identity>> {
        let Some(handler) = &self.handler else {
            return Err(DispatchError::AuthorizationUnavailable);
        };
        if self.policy == DefaultPolicy::Allow || self.is_anonymous(method) {
            return Ok(None);
        }
        if token.is_empty() {
            return Err(DispatchError::InvalidToken("token is required".to_string()));
        }
        let identity = handler.verify(token).await?;
        Ok(Some(identity))
    }
}
