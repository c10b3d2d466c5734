//! Request authentication and tenant context.
//!
//! Every `/api/scheduler` route requires `Authorization: Bearer <token>` when
//! auth mode is `token`, plus an `x-tenant-id` header naming the tenant whose
//! schedules are addressed. `x-user-id` names the author of new schedules.

use std::sync::Arc;

use almanac_core::config::AuthMode;
use almanac_core::{AlmanacError, TenantId, UserId};
use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};

use crate::app::AppState;
use crate::http::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Authenticated caller, extracted from the request headers.
#[derive(Debug, Clone)]
pub struct Caller {
    pub tenant: TenantId,
    pub user: UserId,
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !check_auth(state, &parts.headers) {
            return Err(AlmanacError::AuthFailed(
                "set 'Authorization: Bearer <your-token>' header".to_string(),
            )
            .into());
        }

        let tenant = header(&parts.headers, TENANT_HEADER).ok_or_else(|| {
            AlmanacError::MissingTenant(format!("'{TENANT_HEADER}' header is required"))
        })?;
        let user = header(&parts.headers, USER_HEADER).unwrap_or("anonymous");

        Ok(Self {
            tenant: TenantId::from(tenant),
            user: UserId::from(user),
        })
    }
}

/// Returns true if the request is authorised.
fn check_auth(state: &AppState, headers: &HeaderMap) -> bool {
    match &state.config.gateway.auth.mode {
        AuthMode::None => true,
        AuthMode::Token => {
            let expected = match &state.config.gateway.auth.token {
                Some(t) => t.as_str(),
                // Token mode configured but no token value: deny.
                None => return false,
            };
            extract_bearer(headers)
                .map(|t| t == expected)
                .unwrap_or(false)
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Non-blank header value, trimmed.
fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
