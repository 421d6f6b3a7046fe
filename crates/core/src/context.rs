//! Request-scoped identity handed explicitly to the sync core.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// How the caller was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Bearer token presented on the HTTP API.
    ApiToken,
    /// In-process caller such as the queue worker.
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub kind: PrincipalKind,
    /// Token label or worker name; never the secret itself.
    pub id: String,
}

/// Identity and correlation id for one inbound request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub domain_id: String,
    pub principal: Principal,
}

impl RequestContext {
    pub fn new(domain_id: impl Into<String>, principal: Principal) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            domain_id: domain_id.into(),
            principal,
        }
    }

    /// Context for trusted in-process callers.
    pub fn system(domain_id: impl Into<String>, worker: &str) -> Self {
        Self::new(
            domain_id,
            Principal {
                kind: PrincipalKind::System,
                id: worker.to_string(),
            },
        )
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request {} (domain: {}, principal: {})",
            self.request_id, self.domain_id, self.principal.id
        )
    }
}
