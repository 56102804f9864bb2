use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;

/// Verifies Bearer tokens minted by the (external) auth service. The core
/// only consumes the authenticated principal; registration and session
/// issuance live elsewhere.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
    #[allow(dead_code)]
    exp: usize,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, ApiError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|_| ApiError::Unauthorized)?;
        Ok(data.claims.sub)
    }
}

/// The authenticated caller, extracted from the Authorization header.
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = header.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser(state.jwt.verify(token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: Uuid,
        exp: usize,
    }

    fn token_for(secret: &str, sub: Uuid) -> String {
        let claims = TestClaims {
            sub,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = JwtVerifier::new("test-secret");
        let user_id = Uuid::new_v4();
        let token = token_for("test-secret", user_id);
        assert_eq!(verifier.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn rejects_wrong_signature() {
        let verifier = JwtVerifier::new("test-secret");
        let token = token_for("other-secret", Uuid::new_v4());
        assert!(matches!(
            verifier.verify(&token),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn rejects_garbage() {
        let verifier = JwtVerifier::new("test-secret");
        assert!(matches!(
            verifier.verify("not.a.jwt"),
            Err(ApiError::Unauthorized)
        ));
    }
}
