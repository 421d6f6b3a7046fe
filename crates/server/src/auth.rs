//! Caller-side guard: authenticate the bearer token, authorize the target
//! domain, and build the request context handed to the sync core.

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};

use costsync_core::{Principal, PrincipalKind, RequestContext};

use crate::state::AppState;

/// Domain binding that grants access to every domain.
const ANY_DOMAIN: &str = "*";

pub type ApiError = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Loggable token label; never the full secret.
fn token_label(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}***", prefix)
}

/// Check the caller may act on `domain_id`.
///
/// 401 when the token is missing or unknown, 403 when it is bound to
/// another domain.
pub fn authorize(state: &AppState, headers: &HeaderMap, domain_id: &str) -> Result<RequestContext, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };
    let Some(bound) = state.api_tokens.get(token) else {
        warn!(token = %token_label(token), "rejected unknown API token");
        return Err(reject(StatusCode::UNAUTHORIZED, "invalid bearer token"));
    };
    if bound != ANY_DOMAIN && bound != domain_id {
        warn!(token = %token_label(token), domain_id, "token not permitted for domain");
        return Err(reject(StatusCode::FORBIDDEN, "token is not permitted for this domain"));
    }
    Ok(RequestContext::new(
        domain_id,
        Principal {
            kind: PrincipalKind::ApiToken,
            id: token_label(token),
        },
    ))
}

/// Audit line for state-changing calls.
pub fn log_mutation(ctx: &RequestContext, action: &str, resource_id: &str) {
    info!(
        request_id = %ctx.request_id,
        principal = %ctx.principal.id,
        domain_id = %ctx.domain_id,
        action,
        resource_id,
        "mutation"
    );
}
