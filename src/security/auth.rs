use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::TokenStore;
use crate::models::{BearerResponse, JwtClaims, NewAccessToken, TokenSubject, TokenType};

use super::error::AuthError;
use super::jwt::JwtStrategy;
use super::token_fingerprint;

/// Audience and lifetime (seconds) per kind of token
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_audience: String,
    pub access_lifetime: i64,
    pub refresh_audience: String,
    pub refresh_lifetime: i64,
    pub verify_user_audience: String,
    pub verify_user_lifetime: i64,
    pub reset_password_audience: String,
    pub reset_password_lifetime: i64,
}

impl TokenSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_audience: config.access_token_audience.clone(),
            access_lifetime: config.access_token_lifetime,
            refresh_audience: config.refresh_token_audience.clone(),
            refresh_lifetime: config.refresh_token_lifetime,
            verify_user_audience: config.verify_user_token_audience.clone(),
            verify_user_lifetime: config.verify_user_token_lifetime,
            reset_password_audience: config.reset_password_token_audience.clone(),
            reset_password_lifetime: config.reset_password_token_lifetime,
        }
    }

    pub fn audience(&self, purpose: TokenPurpose) -> Vec<String> {
        let audience = match purpose {
            TokenPurpose::Access => &self.access_audience,
            TokenPurpose::Refresh => &self.refresh_audience,
            TokenPurpose::VerifyUser => &self.verify_user_audience,
            TokenPurpose::ResetPassword => &self.reset_password_audience,
        };
        vec![audience.clone()]
    }

    pub fn lifetime(&self, purpose: TokenPurpose) -> i64 {
        match purpose {
            TokenPurpose::Access => self.access_lifetime,
            TokenPurpose::Refresh => self.refresh_lifetime,
            TokenPurpose::VerifyUser => self.verify_user_lifetime,
            TokenPurpose::ResetPassword => self.reset_password_lifetime,
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_audience: "auth:access".to_string(),
            access_lifetime: 60 * 60,
            refresh_audience: "auth:refresh".to_string(),
            refresh_lifetime: 60 * 60 * 24,
            verify_user_audience: "auth:verify".to_string(),
            verify_user_lifetime: 60 * 60,
            reset_password_audience: "auth:reset".to_string(),
            reset_password_lifetime: 60 * 60,
        }
    }
}

/// What a token is issued for. Each purpose has its own audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Access,
    Refresh,
    VerifyUser,
    ResetPassword,
}

impl TokenPurpose {
    pub fn token_type(&self) -> TokenType {
        match self {
            TokenPurpose::Refresh => TokenType::Refresh,
            _ => TokenType::Access,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub csrf: String,
    pub jti: String,
}

/// Conditions a presented token must satisfy
#[derive(Debug, Clone)]
pub struct TokenRequirement {
    pub audience: Vec<String>,
    pub token_type: TokenType,
    pub require_fresh: bool,
    /// When set, must equal the csrf persisted for the token
    pub csrf: Option<String>,
}

impl TokenRequirement {
    pub fn access(audience: &[String]) -> Self {
        Self {
            audience: audience.to_vec(),
            token_type: TokenType::Access,
            require_fresh: false,
            csrf: None,
        }
    }

    pub fn refresh(audience: &[String]) -> Self {
        Self {
            token_type: TokenType::Refresh,
            ..Self::access(audience)
        }
    }

    pub fn for_purpose(settings: &TokenSettings, purpose: TokenPurpose) -> Self {
        Self {
            token_type: purpose.token_type(),
            ..Self::access(&settings.audience(purpose))
        }
    }

    pub fn fresh(mut self) -> Self {
        self.require_fresh = true;
        self
    }

    pub fn with_csrf(mut self, csrf: impl Into<String>) -> Self {
        self.csrf = Some(csrf.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub user_id: Uuid,
    pub token: String,
    pub claims: JwtClaims,
}

/// Issues, verifies and revokes bearer tokens. A token is honoured only
/// while its record in the store exists, is not revoked and has not expired.
pub struct AuthManager {
    jwt: JwtStrategy,
    tokens: Arc<dyn TokenStore>,
    settings: TokenSettings,
}

impl AuthManager {
    pub fn new(jwt: JwtStrategy, tokens: Arc<dyn TokenStore>, settings: TokenSettings) -> Self {
        Self { jwt, tokens, settings }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Encode a token for `user` and persist its record.
    ///
    /// Refresh tokens always get the configured refresh audience and
    /// lifetime, whatever the caller passes. `Ok(None)` means the JWT could
    /// not be encoded and nothing was issued.
    pub async fn store_token(
        &self,
        user: &TokenSubject,
        audience: &[String],
        expires_seconds: i64,
        is_refresh: bool,
        is_fresh: Option<bool>,
    ) -> Result<Option<IssuedToken>, AuthError> {
        let csrf = Uuid::new_v4().to_string();
        let (token_type, audience, lifetime) = if is_refresh {
            (
                TokenType::Refresh,
                self.settings.audience(TokenPurpose::Refresh),
                self.settings.refresh_lifetime,
            )
        } else {
            (TokenType::Access, audience.to_vec(), expires_seconds)
        };

        let Some(encoded) = self
            .jwt
            .write_token(user, &csrf, token_type, &audience, lifetime, is_fresh)
        else {
            return Ok(None);
        };

        self.tokens
            .create(NewAccessToken {
                token_jti: encoded.jti.clone(),
                csrf: csrf.clone(),
                user_id: user.id,
                expires_at: encoded.expires_at,
            })
            .await?;

        info!(
            "Issued {} token {} for user {}",
            token_type,
            encoded.jti,
            user.id
        );

        Ok(Some(IssuedToken {
            token: encoded.token,
            csrf,
            jti: encoded.jti,
        }))
    }

    /// Issue with the configured audience and lifetime for `purpose`
    pub async fn issue(
        &self,
        user: &TokenSubject,
        purpose: TokenPurpose,
        is_fresh: Option<bool>,
    ) -> Result<IssuedToken, AuthError> {
        self.store_token(
            user,
            &self.settings.audience(purpose),
            self.settings.lifetime(purpose),
            purpose == TokenPurpose::Refresh,
            is_fresh,
        )
        .await?
        .ok_or(AuthError::IssuanceFailed)
    }

    /// A fresh access token plus a refresh token, as handed out at login
    pub async fn issue_pair(&self, user: &TokenSubject) -> Result<BearerResponse, AuthError> {
        let access = self.issue(user, TokenPurpose::Access, Some(true)).await?;
        let refresh = self.issue(user, TokenPurpose::Refresh, None).await?;
        Ok(BearerResponse::new(access.token, access.csrf).with_refresh(refresh.token, refresh.csrf))
    }

    /// Decode without consulting the store
    pub fn read_token(&self, token: &str, audience: &[String]) -> Option<JwtClaims> {
        self.jwt.read_token(token, audience)
    }

    /// Check a presented token against `requirement`.
    ///
    /// Checks run in order and the first failure wins: decoding, subject,
    /// token type, freshness, server-side record, csrf, expiry. A subject
    /// that is not a user id yields `Ok(None)`.
    pub async fn verify_token(
        &self,
        token: &str,
        requirement: &TokenRequirement,
    ) -> Result<Option<VerifiedToken>, AuthError> {
        let claims = self
            .jwt
            .read_token(token, &requirement.audience)
            .ok_or_else(|| {
                debug!("Token {} failed to decode", token_fingerprint(token));
                AuthError::MissingToken
            })?;

        let Some(sub) = claims.sub.clone() else {
            return Err(AuthError::MissingToken);
        };

        match (requirement.token_type, claims.token_type) {
            (TokenType::Access, TokenType::Refresh) => return Err(AuthError::AccessTokenRequired),
            (TokenType::Refresh, TokenType::Access) => return Err(AuthError::RefreshTokenRequired),
            _ => {}
        }

        if requirement.require_fresh && !claims.is_fresh() {
            return Err(AuthError::FreshTokenRequired);
        }

        let record = match self.tokens.read_by_token(&claims.jti).await? {
            Some(record) if !record.is_revoked => record,
            _ => {
                warn!("Rejected revoked or unknown token {}", claims.jti);
                return Err(AuthError::RevokedToken);
            }
        };

        if let Some(csrf) = &requirement.csrf {
            if *csrf != record.csrf {
                warn!("CSRF mismatch for token {}", claims.jti);
                return Err(AuthError::CsrfMismatch);
            }
        }

        // The record is the authoritative clock; the claim must agree
        let now = Utc::now();
        let claim_expiry = Utc.timestamp_opt(claims.exp, 0).single();
        if claim_expiry.map_or(true, |exp| exp <= now) || record.expires_at <= now {
            return Err(AuthError::ExpiredToken);
        }

        let Ok(user_id) = Uuid::parse_str(&sub) else {
            debug!("Token {} has a non-uuid subject", claims.jti);
            return Ok(None);
        };

        if user_id != record.user_id {
            warn!("Token {} subject does not own its record", claims.jti);
            return Err(AuthError::TokenUserMismatch);
        }

        Ok(Some(VerifiedToken {
            user_id,
            token: token.to_owned(),
            claims,
        }))
    }

    /// Soft revoke. Unknown or already revoked tokens are not an error.
    pub async fn revoke_token(&self, token_jti: &str) -> Result<(), AuthError> {
        let touched = self.tokens.revoke(token_jti).await?;
        if touched > 0 {
            info!("Revoked token {}", token_jti);
        }
        Ok(())
    }

    /// Hard delete. Unknown tokens are not an error.
    pub async fn destroy_token(&self, token_jti: &str) -> Result<(), AuthError> {
        let removed = self.tokens.destroy(token_jti).await?;
        if removed > 0 {
            info!("Destroyed token {}", token_jti);
        }
        Ok(())
    }

    /// Revoke every outstanding token of a user, e.g. after a password reset
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let count = self.tokens.revoke_all_for_user(user_id).await?;
        info!("Revoked {} tokens for user {}", count, user_id);
        Ok(count)
    }

    /// Trade a refresh token for a new pair. Scopes carry over from its
    /// claims.
    ///
    /// The new pair is issued before the presented token is revoked, and only
    /// the caller whose revoke flips the record keeps its pair. Concurrent
    /// redemptions of one refresh token therefore yield a single pair; the
    /// others get `RevokedToken`. A failed issuance leaves the presented token
    /// usable.
    pub async fn rotate(&self, refresh_token: &str, csrf: &str) -> Result<BearerResponse, AuthError> {
        let requirement = TokenRequirement::for_purpose(&self.settings, TokenPurpose::Refresh)
            .with_csrf(csrf);
        let verified = self
            .verify_token(refresh_token, &requirement)
            .await?
            .ok_or(AuthError::MissingToken)?;

        let subject = TokenSubject::new(verified.user_id, verified.claims.scopes);
        let access = self.issue(&subject, TokenPurpose::Access, Some(true)).await?;
        let refresh = match self.issue(&subject, TokenPurpose::Refresh, None).await {
            Ok(refresh) => refresh,
            Err(e) => {
                self.discard(&[access.jti.as_str()]).await;
                return Err(e);
            }
        };

        let claimed = match self.tokens.revoke(&verified.claims.jti).await {
            Ok(touched) => touched > 0,
            Err(e) => {
                self.discard(&[access.jti.as_str(), refresh.jti.as_str()]).await;
                return Err(e.into());
            }
        };
        if !claimed {
            warn!("Refresh token {} was already redeemed", verified.claims.jti);
            self.discard(&[access.jti.as_str(), refresh.jti.as_str()]).await;
            return Err(AuthError::RevokedToken);
        }

        info!("Rotated refresh token {} for user {}", verified.claims.jti, subject.id);
        Ok(BearerResponse::new(access.token, access.csrf).with_refresh(refresh.token, refresh.csrf))
    }

    /// Delete tokens that were issued but never handed out
    async fn discard(&self, token_jtis: &[&str]) {
        for jti in token_jtis {
            if let Err(e) = self.tokens.destroy(jti).await {
                warn!("Failed to discard unissued token {}: {}", jti, e);
            }
        }
    }
}
