//! Request-scoped tenant identity.
//!
//! Resolved once per request from headers and passed explicitly into service calls.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{MailError, MailResult};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-tenant-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    Staff,
    Viewer,
}

impl TenantRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "staff" => Some(Self::Staff),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Owner => "owner",
            TenantRole::Admin => "admin",
            TenantRole::Staff => "staff",
            TenantRole::Viewer => "viewer",
        }
    }

    pub fn can_send(&self) -> bool {
        !matches!(self, TenantRole::Viewer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub tenant_id: String,
    pub role: TenantRole,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, role: TenantRole) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            role,
        }
    }

    pub fn ensure_can_send(&self) -> MailResult<()> {
        if self.role.can_send() {
            Ok(())
        } else {
            Err(MailError::Forbidden(format!(
                "role {} may not send mail",
                self.role.as_str()
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct TenantRejection {
    success: bool,
    error: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let reject = |status: StatusCode, error: String| {
            let body = serde_json::to_value(TenantRejection {
                success: false,
                error,
            })
            .unwrap_or_default();
            (status, Json(body))
        };

        let tenant_id = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                reject(
                    StatusCode::UNAUTHORIZED,
                    format!("missing {TENANT_HEADER} header"),
                )
            })?;

        // Absent role header means the tenant's own admin.
        let role = match parts.headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            None => TenantRole::Admin,
            Some(raw) => TenantRole::parse(raw).ok_or_else(|| {
                reject(StatusCode::FORBIDDEN, format!("unknown tenant role: {raw}"))
            })?,
        };

        Ok(TenantContext::new(tenant_id, role))
    }
}
