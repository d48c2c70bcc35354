//! Bearer token validation.
//!
//! HS256 tokens signed with the shared `JWT_SECRET`. Validation is a pure
//! function of the token and the current time: no I/O and no shared mutable
//! state, so one validator is shared by every request.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppResult, AuthRejection, GatewayError};
use crate::models::Principal;

/// Token claims understood by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Expiration (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    #[serde(default)]
    pub iat: i64,
    /// Token id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal {
            subject_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
            permissions: claims.permissions,
        }
    }
}

pub struct AuthValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl: Duration,
}

impl std::fmt::Debug for AuthValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthValidator")
            .field("algorithm", &Algorithm::HS256)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthValidator {
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            token_ttl,
        }
    }

    /// Verify signature and expiry, then build the principal.
    pub fn validate(&self, token: &str) -> Result<Principal, AuthRejection> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.into())
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthRejection::Expired,
                ErrorKind::InvalidSignature => AuthRejection::InvalidSignature,
                _ => AuthRejection::Malformed,
            })
    }

    /// Sign a token for `principal` with the configured lifetime.
    pub fn issue(&self, principal: &Principal) -> AppResult<String> {
        self.issue_with_ttl(principal, self.token_ttl)
    }

    /// Sign a token for `principal` expiring after `ttl`.
    pub fn issue_with_ttl(&self, principal: &Principal, ttl: Duration) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| GatewayError::Internal("token lifetime out of range".to_string()))?;

        let claims = Claims {
            sub: principal.subject_id.clone(),
            email: principal.email.clone(),
            roles: principal.roles.clone(),
            permissions: principal.permissions.clone(),
            exp: now.saturating_add(ttl_secs),
            iat: now,
            jti: Some(Uuid::new_v4().to_string()),
        };

        self.sign(&claims)
    }

    /// Sign arbitrary claims with the configured secret.
    pub fn sign(&self, claims: &Claims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("failed to sign token: {e}")))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn validator() -> AuthValidator {
        AuthValidator::new(SECRET, Duration::from_secs(900))
    }

    fn claims(exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: "user-1".to_string(),
            email: "user@example.com".to_string(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            exp: now + exp_offset,
            iat: now,
            jti: None,
        }
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let v = validator();
        let principal = Principal::new("user-1")
            .with_email("user@example.com")
            .with_roles(["admin", "user"])
            .with_permissions(["expense:read"]);

        let token = v.issue(&principal).unwrap();
        let decoded = v.validate(&token).unwrap();

        assert_eq!(decoded, principal);
    }

    #[test]
    fn test_roles_and_permissions_default_empty() {
        let v = validator();
        #[derive(Serialize)]
        struct Minimal {
            sub: String,
            exp: i64,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Minimal {
                sub: "user-2".to_string(),
                exp: Utc::now().timestamp() + 60,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let principal = v.validate(&token).unwrap();
        assert_eq!(principal.subject_id, "user-2");
        assert!(principal.email.is_empty());
        assert!(principal.roles.is_empty());
        assert!(principal.permissions.is_empty());
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let other = AuthValidator::new("some-other-secret", Duration::from_secs(900));
        let token = other.issue(&Principal::new("user-1")).unwrap();

        assert_eq!(
            validator().validate(&token),
            Err(AuthRejection::InvalidSignature)
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = validator();
        let token = v.sign(&claims(-30)).unwrap();

        assert_eq!(v.validate(&token), Err(AuthRejection::Expired));
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        assert_eq!(
            validator().validate("not.a.jwt"),
            Err(AuthRejection::Malformed)
        );
        assert_eq!(validator().validate(""), Err(AuthRejection::Malformed));
    }

    #[test]
    fn test_wrong_algorithm_is_malformed() {
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims(60),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(validator().validate(&token), Err(AuthRejection::Malformed));
    }

    #[test]
    fn test_issue_uses_configured_ttl() {
        let v = AuthValidator::new(SECRET, Duration::from_secs(120));
        let token = v.issue(&Principal::new("user-1")).unwrap();

        let data = decode::<Claims>(&token, &v.decoding_key, &v.validation).unwrap();
        assert_eq!(data.claims.exp - data.claims.iat, 120);
        assert!(data.claims.jti.is_some());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }
}
