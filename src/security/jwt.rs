use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::{debug, error};
use uuid::Uuid;

use crate::models::{JwtClaims, TokenSubject, TokenType};

/// Signing and verification keys for issued JWTs
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn rsa_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_rsa_pem(private_pem)
                .context("Invalid RSA private key for JWT signing")?,
            decoding: DecodingKey::from_rsa_pem(public_pem)
                .context("Invalid RSA public key for JWT verification")?,
        })
    }
}

/// A freshly encoded token together with what must be persisted about it
#[derive(Debug, Clone)]
pub struct EncodedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Encodes and decodes the compact JWTs handed to clients. Knows nothing
/// about revocation; that lives in the auth manager.
pub struct JwtStrategy {
    keys: JwtKeys,
    algorithm: Algorithm,
    issuer: String,
    leeway: u64,
}

impl JwtStrategy {
    pub fn new(keys: JwtKeys, algorithm: Algorithm, issuer: impl Into<String>, leeway: u64) -> Self {
        Self {
            keys,
            algorithm,
            issuer: issuer.into(),
            leeway,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Build and sign claims for `subject`. Returns `None` if encoding fails.
    pub fn write_token(
        &self,
        subject: &TokenSubject,
        csrf: &str,
        token_type: TokenType,
        audience: &[String],
        lifetime_seconds: i64,
        freshness: Option<bool>,
    ) -> Option<EncodedToken> {
        let now = Utc::now();
        let Some(expires_at) = Duration::try_seconds(lifetime_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
        else {
            error!("Failed to encode {} token: lifetime {}s out of range", token_type, lifetime_seconds);
            return None;
        };
        let claims = JwtClaims {
            token_type,
            iss: self.issuer.clone(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            sub: Some(subject.id.to_string()),
            aud: audience.to_vec(),
            csrf: Some(csrf.to_owned()),
            exp: expires_at.timestamp(),
            fresh: match token_type {
                TokenType::Access => freshness,
                TokenType::Refresh => None,
            },
            scopes: subject.scopes.clone(),
        };

        match encode(&Header::new(self.algorithm), &claims, &self.keys.encoding) {
            Ok(token) => Some(EncodedToken {
                token,
                jti: claims.jti,
                // Persist the second-truncated instant the claim carries
                expires_at: Utc
                    .timestamp_opt(claims.exp, 0)
                    .single()
                    .unwrap_or(expires_at),
            }),
            Err(e) => {
                error!("Failed to encode {} token: {}", token_type, e);
                None
            }
        }
    }

    /// Decode and validate a token for one of `audience`. Signature, issuer,
    /// audience, `exp` and `nbf` are all checked; any failure yields `None`.
    pub fn read_token(&self, token: &str, audience: &[String]) -> Option<JwtClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(audience);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway;

        match decode::<JwtClaims>(token, &self.keys.decoding, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("JWT rejected: {}", e);
                None
            }
        }
    }
}
