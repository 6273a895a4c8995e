//! The authenticated caller, as handed to the core by an upstream auth
//! gateway. Token issuance, password hashing, and signature verification are
//! out of scope (spec.md §1); this crate only consumes the already-verified
//! identity an upstream middleware layer inserted into the request.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Registered,
    Verified,
    Admin,
}

impl Role {
    pub fn can_bid(&self) -> bool {
        matches!(self, Role::Verified | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub email_verified_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }

    pub fn require_verified_email(&self) -> crate::error::Result<()> {
        if self.email_verified() {
            Ok(())
        } else {
            Err(Error::EmailVerificationRequired)
        }
    }

    pub fn require_admin(&self) -> crate::error::Result<()> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(Error::Forbidden("admin role required".into()))
        }
    }

    pub fn require_can_bid(&self) -> crate::error::Result<()> {
        if self.role.can_bid() {
            Ok(())
        } else {
            Err(Error::Forbidden("bidding requires a verified account".into()))
        }
    }
}

/// Reads the `Principal` a gateway/middleware layer placed in request
/// extensions. Absence means no valid token was presented upstream.
#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "missing authenticated principal"))
    }
}
