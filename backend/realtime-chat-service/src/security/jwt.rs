//! Access token verification for HTTP requests and live connections.
//!
//! Tokens are HS256 with the actor's user id in `sub` and their side of the
//! conversation in `role`. Issuing lives here too so local tooling and tests
//! can mint tokens against the same secret.

use crate::error::AppError;
use crate::models::Actor;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id as a UUID string
    pub sub: String,
    /// "couple" or "vendor"
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.leeway = 30;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify `token` and resolve the actor it speaks for. Any failure,
    /// including an unknown role claim, is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Actor, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AppError::Unauthorized
        })?;
        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AppError::Unauthorized)?;
        Actor::parse(user_id, &data.claims.role).map_err(|_| AppError::Unauthorized)
    }

    pub fn issue(&self, actor: Actor, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: actor.user_id.to_string(),
            role: actor.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(JWT_ALGORITHM), &claims, &self.encoding)
            .map_err(|e| AppError::Config(format!("token encoding: {e}")))
    }
}
