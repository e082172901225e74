//! Error kinds for the envelope codec, key loading and the token protocol.

use thiserror::Error;

/// Envelope failures.
#[derive(Error, Debug)]
pub enum CipherError {
    /// Signing or AES encryption failed. Never caused by the plaintext.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Malformed envelope, wrong key or corrupted ciphertext.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The envelope decrypted cleanly but its signature does not verify.
    #[error("signature verification failed")]
    SignatureVerification,
}

/// Key material could not be loaded or generated.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM key: {0}")]
    Pem(String),

    #[error("key generation failed: {0}")]
    Generation(String),
}

/// Token protocol failures. All are terminal for the request.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token missing or invalid")]
    MissingToken,

    #[error("access token required")]
    AccessTokenRequired,

    #[error("refresh token required")]
    RefreshTokenRequired,

    #[error("fresh token required")]
    FreshTokenRequired,

    #[error("token has been revoked")]
    RevokedToken,

    #[error("token csrf does not match")]
    CsrfMismatch,

    #[error("token does not belong to its subject")]
    TokenUserMismatch,

    #[error("token has expired")]
    ExpiredToken,

    #[error("token could not be issued")]
    IssuanceFailed,

    #[error("token store failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable code for the transport layer.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "TOKEN_INVALID",
            AuthError::AccessTokenRequired => "ACCESS_TOKEN_REQUIRED",
            AuthError::RefreshTokenRequired => "REFRESH_TOKEN_REQUIRED",
            AuthError::FreshTokenRequired => "FRESH_TOKEN_REQUIRED",
            AuthError::RevokedToken => "TOKEN_REVOKED",
            AuthError::CsrfMismatch => "TOKEN_CSRF_INVALID",
            AuthError::TokenUserMismatch => "BAD_TOKEN_USER",
            AuthError::ExpiredToken => "TOKEN_EXPIRED",
            AuthError::IssuanceFailed => "TOKEN_ERROR",
            AuthError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}
