//! HS256 bearer tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use super::CryptoError;
use crate::models::enums::Role;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Token payload. Times are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks tokens with one shared secret.
#[derive(Clone)]
pub struct JwtSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl JwtSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role, name: &str, now: DateTime<Utc>) -> Result<String, CryptoError> {
        let claims = Claims {
            sub: user_id,
            role,
            name: name.to_string(),
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(self.ttl)
                .ok_or(CryptoError::LifetimeOutOfRange)?
                .timestamp(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, CryptoError> {
        let payload = serde_json::to_vec(claims).map_err(|_| CryptoError::InvalidToken)?;
        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.mac(&message)?.finalize().into_bytes();
        Ok(format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, CryptoError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::InvalidToken);
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CryptoError::InvalidToken)?;
        self.mac(&format!("{header}.{payload}"))?
            .verify_slice(&signature)
            .map_err(|_| CryptoError::InvalidToken)?;

        let header = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| CryptoError::InvalidToken)?;
        let header: serde_json::Value =
            serde_json::from_slice(&header).map_err(|_| CryptoError::InvalidToken)?;
        if header.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
            return Err(CryptoError::InvalidToken);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CryptoError::InvalidToken)?;
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| CryptoError::InvalidToken)?;
        if claims.exp <= now.timestamp() {
            return Err(CryptoError::TokenExpired);
        }
        Ok(claims)
    }

    fn mac(&self, message: &str) -> Result<HmacSha256, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| CryptoError::InvalidKey)?;
        mac.update(message.as_bytes());
        Ok(mac)
    }
}
