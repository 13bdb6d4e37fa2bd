//! Caller identity and the sensor ingestion credential.
//!
//! Authentication itself lives upstream (a gateway terminates sessions and
//! forwards who the caller is); the hub only reads the forwarded headers as
//! an opaque (authenticated, role) pair and enforces preconditions on them.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::error::AppError;

/// Header carrying the shared secret on sensor posts.
pub const SENSOR_TOKEN_HEADER: &str = "x-sensor-token";
/// Headers set by the upstream gateway.
const USER_HEADER: &str = "x-auth-user";
const ROLE_HEADER: &str = "x-auth-role";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub authenticated: bool,
    pub role: Role,
}

impl Identity {
    pub fn require_user(&self) -> Result<(), AppError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(AppError::Unauthorized("authentication required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_user()?;
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Unauthorized(
                "administrator privileges required".to_string(),
            ))
        }
    }

    fn from_parts(parts: &Parts) -> Self {
        let authenticated = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.trim().is_empty());

        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.eq_ignore_ascii_case("admin"))
            .map_or(Role::User, |_| Role::Admin);

        Self {
            authenticated,
            role,
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Identity::from_parts(parts))
    }
}

// ---------------------------------------------------------------------------
// Sensor token
// ---------------------------------------------------------------------------

/// Compare the presented ingestion credential against the configured shared
/// secret. No configured secret is a server problem, not a caller problem.
pub fn verify_sensor_token(
    configured: Option<&str>,
    presented: Option<&str>,
) -> Result<(), AppError> {
    let Some(expected) = configured else {
        return Err(AppError::Misconfigured(
            "sensor token is not configured".to_string(),
        ));
    };
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::Unauthorized("invalid sensor token".to_string())),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    // -- Identity ---------------------------------------------------------

    #[test]
    fn no_headers_is_anonymous() {
        let identity = Identity::from_parts(&parts_with(&[]));
        assert!(!identity.authenticated);
        assert_eq!(identity.role, Role::User);
        assert!(identity.require_user().is_err());
    }

    #[test]
    fn user_header_authenticates() {
        let identity = Identity::from_parts(&parts_with(&[("x-auth-user", "maria")]));
        assert!(identity.authenticated);
        assert_eq!(identity.role, Role::User);
        identity.require_user().unwrap();
        assert!(matches!(
            identity.require_admin(),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn admin_role_header_grants_admin() {
        let identity = Identity::from_parts(&parts_with(&[
            ("x-auth-user", "maria"),
            ("x-auth-role", "Admin"),
        ]));
        identity.require_admin().unwrap();
    }

    #[test]
    fn role_without_user_is_still_anonymous() {
        let identity = Identity::from_parts(&parts_with(&[("x-auth-role", "admin")]));
        assert!(!identity.authenticated);
        assert!(identity.require_admin().is_err());
    }

    #[test]
    fn blank_user_header_is_anonymous() {
        let identity = Identity::from_parts(&parts_with(&[("x-auth-user", "  ")]));
        assert!(!identity.authenticated);
    }

    // -- Sensor token -----------------------------------------------------

    #[test]
    fn matching_token_accepted() {
        verify_sensor_token(Some("secreto"), Some("secreto")).unwrap();
    }

    #[test]
    fn wrong_token_rejected() {
        let err = verify_sensor_token(Some("secreto"), Some("nope")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn missing_token_rejected() {
        let err = verify_sensor_token(Some("secreto"), None).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn unconfigured_token_is_server_misconfiguration() {
        let err = verify_sensor_token(None, Some("anything")).unwrap_err();
        assert!(matches!(err, AppError::Misconfigured(_)));
    }
}
