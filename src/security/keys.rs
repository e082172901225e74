use rand::rngs::OsRng;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs1v15::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use std::{fmt, fs, path::Path};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::Config;
use super::error::KeyError;

/// AES-256 key size in bytes
pub const AES_KEY_SIZE: usize = 32;

/// Modulus size of generated signing keys
pub const RSA_KEY_BITS: usize = 2048;

/// Key material behind a `SecureMessage`. Read-only once built; rotating
/// keys means building a new value.
#[derive(Clone)]
pub struct KeyMaterial {
    aes_key: Zeroizing<[u8; AES_KEY_SIZE]>,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
}

impl KeyMaterial {
    /// Build key material from configuration. Loads the persisted keypair when
    /// one is configured, otherwise generates a keypair that lives only as
    /// long as this process.
    pub fn initialize(config: &Config) -> Result<Self, KeyError> {
        match (&config.rsa_private_key_path, &config.rsa_public_key_path) {
            (Some(private_path), Some(public_path)) => {
                let private_key = load_private_key(private_path)?;
                let public_key = load_public_key(public_path)?;
                if RsaPublicKey::from(&private_key) != public_key {
                    return Err(KeyError::Pem("public key does not match private key".to_string()));
                }
                info!("Loaded envelope signing keys from {}", private_path.display());
                Ok(Self::from_keys(&config.encryption_key, private_key, public_key))
            }
            _ => {
                warn!("No persisted signing keys configured; envelopes will not verify after a restart");
                Self::generate(&config.encryption_key)
            }
        }
    }

    /// Fresh ephemeral keypair with an AES key derived from `passphrase`
    pub fn generate(passphrase: &str) -> Result<Self, KeyError> {
        let (private_key, public_key) = generate_rsa_keypair()?;
        Ok(Self::from_keys(passphrase, private_key, public_key))
    }

    pub fn from_keys(passphrase: &str, private_key: RsaPrivateKey, public_key: RsaPublicKey) -> Self {
        Self {
            aes_key: Self::derive_aes_key(passphrase),
            signing_key: SigningKey::<Sha256>::new(private_key),
            verifying_key: VerifyingKey::<Sha256>::new(public_key),
        }
    }

    /// SHA-256 of the passphrase; the passphrase itself is never a key
    pub fn derive_aes_key(passphrase: &str) -> Zeroizing<[u8; AES_KEY_SIZE]> {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        key.copy_from_slice(&digest);
        key
    }

    /// Same AES key and signer, different verifier
    pub fn with_verifying_key(&self, public_key: RsaPublicKey) -> Self {
        Self {
            aes_key: self.aes_key.clone(),
            signing_key: self.signing_key.clone(),
            verifying_key: VerifyingKey::<Sha256>::new(public_key),
        }
    }

    pub fn aes_key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.aes_key
    }

    pub fn signing_key(&self) -> &SigningKey<Sha256> {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey<Sha256> {
        &self.verifying_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

pub fn generate_rsa_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), KeyError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| KeyError::Generation(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok((private_key, public_key))
}

/// PKCS#8 private and SPKI public PEM encodings
pub fn export_pem(private_key: &RsaPrivateKey) -> Result<(Zeroizing<String>, String), KeyError> {
    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| KeyError::Pem(e.to_string()))?;
    let public_pem = RsaPublicKey::from(private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyError::Pem(e.to_string()))?;
    Ok((private_pem, public_pem))
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyError::Pem(e.to_string()))
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, KeyError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyError::Pem(e.to_string()))
}

pub fn read_key_file(path: &Path) -> Result<Zeroizing<String>, KeyError> {
    fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|source| KeyError::Io {
            path: path.display().to_string(),
            source,
        })
}

fn load_private_key(path: &Path) -> Result<RsaPrivateKey, KeyError> {
    parse_private_key(&read_key_file(path)?)
}

fn load_public_key(path: &Path) -> Result<RsaPublicKey, KeyError> {
    parse_public_key(&read_key_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_key_is_derived_not_copied() {
        let key = KeyMaterial::derive_aes_key("passphrase");
        assert_eq!(key.len(), AES_KEY_SIZE);
        assert_ne!(&key[..10], b"passphrase");
        assert_eq!(*key, *KeyMaterial::derive_aes_key("passphrase"));
        assert_ne!(*key, *KeyMaterial::derive_aes_key("passphrase2"));
    }

    #[test]
    fn test_pem_roundtrip_and_mismatch_detection() {
        let (private_key, public_key) = generate_rsa_keypair().unwrap();
        let (private_pem, public_pem) = export_pem(&private_key).unwrap();

        assert_eq!(parse_private_key(&private_pem).unwrap(), private_key);
        assert_eq!(parse_public_key(&public_pem).unwrap(), public_key);

        let dir = std::env::temp_dir().join(format!("gcapi-keys-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let private_path = dir.join("private.pem");
        let public_path = dir.join("public.pem");
        fs::write(&private_path, private_pem.as_bytes()).unwrap();
        fs::write(&public_path, public_pem.as_bytes()).unwrap();

        let mut config = crate::config::test_config();
        config.rsa_private_key_path = Some(private_path.clone());
        config.rsa_public_key_path = Some(public_path.clone());
        let keys = KeyMaterial::initialize(&config).unwrap();
        assert_eq!(keys.aes_key(), &*KeyMaterial::derive_aes_key(&config.encryption_key));

        let (_, other_public) = generate_rsa_keypair().unwrap();
        fs::write(&public_path, other_public.to_public_key_pem(LineEnding::LF).unwrap()).unwrap();
        assert!(matches!(KeyMaterial::initialize(&config), Err(KeyError::Pem(_))));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_key_file() {
        let mut config = crate::config::test_config();
        config.rsa_private_key_path = Some("/nonexistent/private.pem".into());
        config.rsa_public_key_path = Some("/nonexistent/public.pem".into());
        assert!(matches!(KeyMaterial::initialize(&config), Err(KeyError::Io { .. })));
    }

    #[test]
    fn test_debug_is_redacted() {
        let (private_key, public_key) = generate_rsa_keypair().unwrap();
        let keys = KeyMaterial::from_keys("passphrase", private_key, public_key);
        assert_eq!(format!("{:?}", keys), "KeyMaterial([REDACTED])");
    }
}
