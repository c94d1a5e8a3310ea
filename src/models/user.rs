use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// The signed-in user as reported by the auth service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// The subset of access-token claims this client reads.
#[derive(Deserialize, Clone, Debug)]
pub struct TokenClaims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
}

impl Session {
    /// Reads the access token's claims. The signature is NOT verified; the
    /// backend does that on every request.
    pub fn claims(&self) -> Result<TokenClaims, AppError> {
        decode_claims(&self.access_token)
    }

    /// Expired, or within `leeway_seconds` of expiring.
    pub fn is_expired(&self, leeway_seconds: i64) -> bool {
        let expires_at = match self.expires_at {
            Some(ts) => ts,
            None => match self.claims() {
                Ok(claims) => claims.exp,
                // An unreadable token is treated as stale so it gets refreshed.
                Err(_) => return true,
            },
        };
        Utc::now().timestamp() + leeway_seconds >= expires_at
    }
}

pub fn decode_claims(token: &str) -> Result<TokenClaims, AppError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| AppError::NotAuthenticated(format!("Unreadable access token: {e}")))
}

#[cfg(test)]
pub(crate) fn test_token(user_id: Uuid, email: &str, exp: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = serde_json::json!({
        "sub": user_id.to_string(),
        "email": email,
        "exp": exp,
        "role": "authenticated",
        "aud": "authenticated",
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"super-secret-jwt-token"))
        .expect("test token encodes")
}
