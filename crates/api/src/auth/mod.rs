//! Authentication middleware
//!
//! Session issuance lives in the external identity provider; this module
//! only validates the bearer tokens it mints and exposes the caller as an
//! `AuthUser` request extension.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Claims expected in an identity-provider token
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,
    pub email: Option<String>,
    pub exp: i64,
}

/// Authenticated caller identity
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// Validates bearer tokens against the identity provider's signing secret
#[derive(Clone)]
pub struct JwtManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and extract the caller identity
    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Token validation failed");
            ApiError::Unauthorized
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| {
            tracing::warn!("Token subject is not a UUID");
            ApiError::Unauthorized
        })?;

        Ok(AuthUser {
            user_id,
            email: data.claims.email,
        })
    }
}

/// Require a valid bearer token and attach `AuthUser` to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let auth_user = state.jwt_manager.verify(token)?;
    req.extensions_mut().insert(auth_user);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use time::OffsetDateTime;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        email: Option<String>,
        exp: i64,
    }

    fn token(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            email: Some("owner@example.test".to_string()),
            exp: OffsetDateTime::now_utc().unix_timestamp() + exp_offset_secs,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_auth_user() {
        let manager = JwtManager::new("unit-test-secret");
        let user_id = Uuid::new_v4();
        let auth = manager
            .verify(&token("unit-test-secret", &user_id.to_string(), 3600))
            .unwrap();
        assert_eq!(auth.user_id, user_id);
        assert_eq!(auth.email.as_deref(), Some("owner@example.test"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let manager = JwtManager::new("unit-test-secret");
        let result = manager.verify(&token("unit-test-secret", &Uuid::new_v4().to_string(), -3600));
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let manager = JwtManager::new("unit-test-secret");
        let result = manager.verify(&token("other-secret", &Uuid::new_v4().to_string(), 3600));
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn non_uuid_subject_is_rejected() {
        let manager = JwtManager::new("unit-test-secret");
        let result = manager.verify(&token("unit-test-secret", "not-a-uuid", 3600));
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
