use anyhow::{Context, Result};
use jsonwebtoken::Algorithm;
use std::{env, fmt, path::PathBuf, str::FromStr};

/// Upper bound for any token lifetime, ten years in seconds
pub const MAX_TOKEN_LIFETIME: i64 = 60 * 60 * 24 * 365 * 10;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    /// Issuer written into every JWT.
    pub project_name: String,
    /// Passphrase the envelope AES key is derived from.
    pub encryption_key: String,
    /// PEM keypair for envelope signatures. When unset a fresh keypair is
    /// generated at boot and envelopes do not verify across restarts.
    pub rsa_private_key_path: Option<PathBuf>,
    pub rsa_public_key_path: Option<PathBuf>,
    /// HMAC secret for HS* algorithms.
    pub secret_key: String,
    pub jwt_algorithm: String,
    pub jwt_leeway_seconds: u64,
    pub access_token_audience: String,
    pub access_token_lifetime: i64,
    pub refresh_token_audience: String,
    pub refresh_token_lifetime: i64,
    pub verify_user_token_audience: String,
    pub verify_user_token_lifetime: i64,
    pub reset_password_token_audience: String,
    pub reset_password_token_lifetime: i64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("log_level", &self.log_level)
            .field("project_name", &self.project_name)
            .field("encryption_key", &"[REDACTED]")
            .field("rsa_private_key_path", &self.rsa_private_key_path)
            .field("rsa_public_key_path", &self.rsa_public_key_path)
            .field("secret_key", &"[REDACTED]")
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("jwt_leeway_seconds", &self.jwt_leeway_seconds)
            .field("access_token_audience", &self.access_token_audience)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("refresh_token_audience", &self.refresh_token_audience)
            .field("refresh_token_lifetime", &self.refresh_token_lifetime)
            .field("verify_user_token_audience", &self.verify_user_token_audience)
            .field("verify_user_token_lifetime", &self.verify_user_token_lifetime)
            .field("reset_password_token_audience", &self.reset_password_token_audience)
            .field("reset_password_token_lifetime", &self.reset_password_token_lifetime)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL not set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8888".to_string())
                .parse()
                .context("Invalid PORT")?,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info".to_string()),
            project_name: env::var("API_NAME")
                .unwrap_or_else(|_| "GCAPI".to_string()),
            encryption_key: env::var("API_ENCRYPTION_KEY")
                .context("API_ENCRYPTION_KEY not set")?,
            rsa_private_key_path: env::var("API_RSA_PRIVATE_KEY_PATH").ok().map(PathBuf::from),
            rsa_public_key_path: env::var("API_RSA_PUBLIC_KEY_PATH").ok().map(PathBuf::from),
            secret_key: env::var("API_SECRET_KEY")
                .context("API_SECRET_KEY not set")?,
            jwt_algorithm: env::var("JWT_ALGORITHM")
                .unwrap_or_else(|_| "HS256".to_string()),
            jwt_leeway_seconds: parse_or("JWT_LEEWAY_SECONDS", 0)?,
            access_token_audience: env::var("ACCESS_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "auth:access".to_string()),
            access_token_lifetime: parse_or("ACCESS_TOKEN_LIFETIME", 60 * 60)?,
            refresh_token_audience: env::var("REFRESH_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "auth:refresh".to_string()),
            refresh_token_lifetime: parse_or("REFRESH_TOKEN_LIFETIME", 60 * 60 * 24)?,
            verify_user_token_audience: env::var("VERIFY_USER_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "auth:verify".to_string()),
            verify_user_token_lifetime: parse_or("VERIFY_USER_TOKEN_LIFETIME", 60 * 60)?,
            reset_password_token_audience: env::var("RESET_PASSWORD_TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "auth:reset".to_string()),
            reset_password_token_lifetime: parse_or("RESET_PASSWORD_TOKEN_LIFETIME", 60 * 60)?,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Validate database URL
        if !self.database_url.starts_with("postgresql://") && !self.database_url.starts_with("postgres://") {
            anyhow::bail!("DATABASE_URL must be a PostgreSQL connection string");
        }

        if self.encryption_key.chars().count() < 16 {
            anyhow::bail!("API_ENCRYPTION_KEY must be at least 16 characters");
        }

        let algorithm = self.algorithm()?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                if self.secret_key.len() < 32 {
                    anyhow::bail!("API_SECRET_KEY must be at least 32 bytes for {:?}", algorithm);
                }
            }
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                if self.rsa_private_key_path.is_none() || self.rsa_public_key_path.is_none() {
                    anyhow::bail!("{:?} requires API_RSA_PRIVATE_KEY_PATH and API_RSA_PUBLIC_KEY_PATH", algorithm);
                }
            }
            other => anyhow::bail!("Unsupported JWT_ALGORITHM: {:?}", other),
        }

        // The keypair is all or nothing
        if self.rsa_private_key_path.is_some() != self.rsa_public_key_path.is_some() {
            anyhow::bail!("API_RSA_PRIVATE_KEY_PATH and API_RSA_PUBLIC_KEY_PATH must be set together");
        }

        let lifetimes = [
            ("ACCESS_TOKEN_LIFETIME", self.access_token_lifetime),
            ("REFRESH_TOKEN_LIFETIME", self.refresh_token_lifetime),
            ("VERIFY_USER_TOKEN_LIFETIME", self.verify_user_token_lifetime),
            ("RESET_PASSWORD_TOKEN_LIFETIME", self.reset_password_token_lifetime),
        ];
        for (name, lifetime) in lifetimes {
            if lifetime <= 0 {
                anyhow::bail!("{} must be positive", name);
            }
            if lifetime > MAX_TOKEN_LIFETIME {
                anyhow::bail!("{} must not exceed {} seconds", name, MAX_TOKEN_LIFETIME);
            }
        }

        // Distinct audiences keep one kind of token from passing as another
        let audiences = [
            &self.access_token_audience,
            &self.refresh_token_audience,
            &self.verify_user_token_audience,
            &self.reset_password_token_audience,
        ];
        for (i, a) in audiences.iter().enumerate() {
            if a.is_empty() {
                anyhow::bail!("Token audiences must not be empty");
            }
            if audiences[i + 1..].contains(a) {
                anyhow::bail!("Token audience {} is used for more than one purpose", a);
            }
        }

        Ok(())
    }

    /// Parsed JWT signing algorithm
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(&self.jwt_algorithm)
            .map_err(|_| anyhow::anyhow!("Invalid JWT_ALGORITHM: {}", self.jwt_algorithm))
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/gcapi_test".to_string(),
        port: 8888,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        log_level: "debug".to_string(),
        project_name: "GCAPI".to_string(),
        encryption_key: "hNaZZH07R5yxXsbE1mEVPERNOJZwyb/O+jlhqonG2I0=".to_string(),
        rsa_private_key_path: None,
        rsa_public_key_path: None,
        secret_key: "54295fb3ad6577bf6ec55fc8a4e2ce86b4a490b5f1666f1e871e94855f6dc0a7".to_string(),
        jwt_algorithm: "HS256".to_string(),
        jwt_leeway_seconds: 0,
        access_token_audience: "auth:access".to_string(),
        access_token_lifetime: 3600,
        refresh_token_audience: "auth:refresh".to_string(),
        refresh_token_lifetime: 86400,
        verify_user_token_audience: "auth:verify".to_string(),
        verify_user_token_lifetime: 3600,
        reset_password_token_audience: "auth:reset".to_string(),
        reset_password_token_lifetime: 3600,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_postgres_url() {
        let mut config = test_config();
        config.database_url = "mysql://localhost/gcapi".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_short_hmac_secret() {
        let mut config = test_config();
        config.secret_key = "too-short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_shared_audience() {
        let mut config = test_config();
        config.refresh_token_audience = config.access_token_audience.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_half_configured_keypair() {
        let mut config = test_config();
        config.rsa_private_key_path = Some(PathBuf::from("/keys/private.pem"));
        assert!(config.validate().is_err());

        config.rsa_public_key_path = Some(PathBuf::from("/keys/public.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rs256_requires_keypair() {
        let mut config = test_config();
        config.jwt_algorithm = "RS256".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_lifetime() {
        let mut config = test_config();
        config.access_token_lifetime = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_lifetime() {
        let mut config = test_config();
        config.refresh_token_lifetime = i64::MAX / 1000;
        assert!(config.validate().is_err());

        config.refresh_token_lifetime = MAX_TOKEN_LIFETIME;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = test_config();
        let printed = format!("{:?}", config);
        assert!(!printed.contains(&config.encryption_key));
        assert!(!printed.contains(&config.secret_key));
        assert!(!printed.contains(&config.database_url));
        assert!(printed.contains("[REDACTED]"));
        assert!(printed.contains("auth:access"));
    }
}
