use axum::{
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, post},
    Router,
};
use tracing::{error, info, warn};

use crate::{
    models::{BearerResponse, EncryptedMessage, HealthCheckResponse, PlainMessage, RevokeResponse},
    monitoring::MetricsSnapshot,
    security::{token_fingerprint, AuthError, CipherError, TokenPurpose, TokenRequirement, VerifiedToken},
    state::AppState,
};

pub const CSRF_HEADER: &str = "x-csrf-token";

type HandlerError = (StatusCode, String);

/// All routes, with state attached. Layers are added by the caller.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/security/encrypt", post(encrypt_message))
        .route("/security/decrypt", post(decrypt_message))
        .route("/auth/refresh", post(refresh_tokens))
        .route("/auth/revoke", delete(revoke_token))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn csrf_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok())
}

fn auth_rejection(err: AuthError) -> HandlerError {
    let status = match err {
        AuthError::MissingToken
        | AuthError::RevokedToken
        | AuthError::ExpiredToken
        | AuthError::TokenUserMismatch => StatusCode::UNAUTHORIZED,
        AuthError::AccessTokenRequired
        | AuthError::RefreshTokenRequired
        | AuthError::FreshTokenRequired
        | AuthError::CsrfMismatch => StatusCode::FORBIDDEN,
        AuthError::IssuanceFailed | AuthError::Storage(_) => {
            error!("Token layer failure: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.reason().to_string())
}

fn cipher_rejection(err: CipherError) -> HandlerError {
    match err {
        CipherError::Encryption(e) => {
            error!("Envelope encryption failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
        }
        CipherError::Decryption(_) => (StatusCode::BAD_REQUEST, "Decryption error".to_string()),
        CipherError::SignatureVerification => {
            (StatusCode::BAD_REQUEST, "Signature verification failed".to_string())
        }
    }
}

/// Resolve the bearer token against `requirement`, counting the outcome.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    requirement: TokenRequirement,
) -> Result<VerifiedToken, HandlerError> {
    let reject = |err: AuthError| {
        state.metrics.increment_rejected();
        state.metrics.increment_failed();
        auth_rejection(err)
    };

    let token = bearer_token(headers).ok_or_else(|| reject(AuthError::MissingToken))?;

    match state.auth.verify_token(token, &requirement).await {
        Ok(Some(verified)) => {
            state.metrics.increment_verified();
            Ok(verified)
        }
        Ok(None) => {
            warn!("Token {} names no user", token_fingerprint(token));
            Err(reject(AuthError::TokenUserMismatch))
        }
        Err(e) => {
            warn!("Token {} rejected: {}", token_fingerprint(token), e);
            Err(reject(e))
        }
    }
}

/// Access token requirement, with the csrf check applied when the header is sent
fn access_requirement(state: &AppState, headers: &HeaderMap) -> TokenRequirement {
    let requirement = TokenRequirement::for_purpose(state.auth.settings(), TokenPurpose::Access);
    match csrf_token(headers) {
        Some(csrf) => requirement.with_csrf(csrf),
        None => requirement,
    }
}

/// Seal a plaintext message for the authenticated caller
pub async fn encrypt_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PlainMessage>,
) -> Result<Json<EncryptedMessage>, HandlerError> {
    state.metrics.increment_requests();
    let verified = authorize(&state, &headers, access_requirement(&state, &headers)).await?;

    let message = state.codec.encrypt(&request.message).map_err(|e| {
        state.metrics.increment_failed();
        cipher_rejection(e)
    })?;

    info!("Sealed envelope for user {}", verified.user_id);
    state.metrics.increment_encrypted();
    Ok(Json(EncryptedMessage { message }))
}

/// Open an envelope for the authenticated caller
pub async fn decrypt_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EncryptedMessage>,
) -> Result<Json<PlainMessage>, HandlerError> {
    state.metrics.increment_requests();
    let verified = authorize(&state, &headers, access_requirement(&state, &headers)).await?;

    let message = state.codec.decrypt(&request.message).map_err(|e| {
        warn!("Envelope rejected for user {}: {}", verified.user_id, e);
        state.metrics.increment_decryption_failed();
        state.metrics.increment_failed();
        cipher_rejection(e)
    })?;

    state.metrics.increment_decrypted();
    Ok(Json(PlainMessage { message }))
}

/// Rotate a refresh token into a new token pair
pub async fn refresh_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BearerResponse>, HandlerError> {
    state.metrics.increment_requests();

    let Some(token) = bearer_token(&headers) else {
        state.metrics.increment_rejected();
        state.metrics.increment_failed();
        return Err(auth_rejection(AuthError::MissingToken));
    };
    let csrf = csrf_token(&headers).unwrap_or_default();

    match state.auth.rotate(token, csrf).await {
        Ok(pair) => {
            state.metrics.increment_verified();
            state.metrics.increment_revoked();
            state.metrics.add_issued(2);
            Ok(Json(pair))
        }
        Err(e) => {
            warn!("Refresh with token {} rejected: {}", token_fingerprint(token), e);
            state.metrics.increment_rejected();
            state.metrics.increment_failed();
            Err(auth_rejection(e))
        }
    }
}

/// Revoke the presented access token
pub async fn revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RevokeResponse>, HandlerError> {
    state.metrics.increment_requests();

    let csrf = csrf_token(&headers).unwrap_or_default().to_string();
    let requirement = TokenRequirement::for_purpose(state.auth.settings(), TokenPurpose::Access)
        .with_csrf(csrf);
    let verified = authorize(&state, &headers, requirement).await?;

    state
        .auth
        .revoke_token(&verified.claims.jti)
        .await
        .map_err(|e| {
            state.metrics.increment_failed();
            auth_rejection(e)
        })?;

    state.metrics.increment_revoked();
    Ok(Json(RevokeResponse {
        revoked: true,
        jti: verified.claims.jti,
    }))
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthCheckResponse>, StatusCode> {
    // Check token store connectivity
    match state.auth.store().ping().await {
        Ok(()) => Ok(Json(HealthCheckResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })),
        Err(e) => {
            error!("Health check failed: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Get service metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.get_stats())
}
