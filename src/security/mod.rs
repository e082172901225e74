pub mod auth;
pub mod cipher;
pub mod error;
pub mod jwt;
pub mod keys;

pub use auth::{AuthManager, IssuedToken, TokenPurpose, TokenRequirement, TokenSettings, VerifiedToken};
pub use cipher::SecureMessage;
pub use error::{AuthError, CipherError, KeyError};
pub use jwt::{JwtKeys, JwtStrategy};
pub use keys::KeyMaterial;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::Config;
use crate::db::TokenStore;

/// Codec and token manager built from one configuration
pub struct SecurityCore {
    pub codec: SecureMessage,
    pub auth: AuthManager,
}

/// Build the security components from configuration. Nothing here is global:
/// two calls yield two independent cores.
pub fn initialize(config: &Config, tokens: Arc<dyn TokenStore>) -> Result<SecurityCore> {
    let key_material = Arc::new(KeyMaterial::initialize(config)?);

    let algorithm = config.algorithm()?;
    let jwt_keys = match algorithm {
        jsonwebtoken::Algorithm::RS256 | jsonwebtoken::Algorithm::RS384 | jsonwebtoken::Algorithm::RS512 => {
            let (Some(private_path), Some(public_path)) =
                (&config.rsa_private_key_path, &config.rsa_public_key_path)
            else {
                anyhow::bail!("{:?} requires a persisted RSA keypair", algorithm);
            };
            let private_pem = keys::read_key_file(private_path)?;
            let public_pem = keys::read_key_file(public_path)?;
            JwtKeys::rsa_pem(private_pem.as_bytes(), public_pem.as_bytes())?
        }
        _ => JwtKeys::hmac(config.secret_key.as_bytes()),
    };

    let jwt = JwtStrategy::new(
        jwt_keys,
        algorithm,
        config.project_name.clone(),
        config.jwt_leeway_seconds,
    );

    Ok(SecurityCore {
        codec: SecureMessage::new(key_material),
        auth: AuthManager::new(jwt, tokens, TokenSettings::from_config(config)),
    })
}

/// Hash a token for logging; raw tokens never reach the logs
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = <Sha256 as Digest>::new();
    hasher.update(token.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(&hasher.finalize()[..12])
}
