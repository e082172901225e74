//! Sign-then-encrypt envelopes.
//!
//! The plaintext is signed (RSA PKCS#1 v1.5 over SHA-256), wrapped together
//! with its signature in a small JSON document, padded, and encrypted with
//! AES-256-CBC under a fresh IV. The envelope is `base64url(IV || ciphertext)`.

use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs1v15::Signature,
    signature::{SignatureEncoding, Signer, Verifier},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::CipherError;
use super::keys::KeyMaterial;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// The IV occupies exactly one block
pub const IV_SIZE: usize = BLOCK_SIZE;

#[derive(Debug, Serialize, Deserialize)]
struct SignedPayload {
    message: String,
    signature: String,
}

#[derive(Debug, Clone)]
pub struct SecureMessage {
    keys: Arc<KeyMaterial>,
}

impl SecureMessage {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<KeyMaterial> {
        &self.keys
    }

    /// Sign and encrypt `plaintext` into an opaque base64url envelope
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let signature = self
            .keys
            .signing_key()
            .try_sign(plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(format!("signing failed: {}", e)))?;

        let payload = SignedPayload {
            message: plaintext.to_owned(),
            signature: general_purpose::URL_SAFE.encode(signature.to_vec()),
        };
        let serialized = serde_json::to_vec(&payload)
            .map_err(|e| CipherError::Encryption(format!("serialization failed: {}", e)))?;
        let padded = pad(&serialized, BLOCK_SIZE);

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new_from_slices(self.keys.aes_key(), &iv)
            .map_err(|e| CipherError::Encryption(format!("cipher setup failed: {}", e)))?
            .encrypt_padded_vec_mut::<NoPadding>(&padded);

        let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len());
        envelope.extend_from_slice(&iv);
        envelope.extend_from_slice(&ciphertext);

        debug!("Encrypted {} plaintext bytes into {} envelope bytes", plaintext.len(), envelope.len());
        Ok(general_purpose::URL_SAFE.encode(envelope))
    }

    /// Decrypt an envelope and verify the embedded signature
    pub fn decrypt(&self, envelope: &str) -> Result<String, CipherError> {
        let decoded = general_purpose::URL_SAFE
            .decode(envelope.trim())
            .map_err(|e| CipherError::Decryption(format!("invalid base64: {}", e)))?;

        if decoded.len() < IV_SIZE + BLOCK_SIZE || (decoded.len() - IV_SIZE) % BLOCK_SIZE != 0 {
            return Err(CipherError::Decryption(format!(
                "invalid envelope length: {}",
                decoded.len()
            )));
        }

        let (iv, ciphertext) = decoded.split_at(IV_SIZE);
        let padded = Aes256CbcDec::new_from_slices(self.keys.aes_key(), iv)
            .map_err(|e| CipherError::Decryption(format!("cipher setup failed: {}", e)))?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|e| CipherError::Decryption(format!("cipher failed: {}", e)))?;

        let payload: SignedPayload = serde_json::from_slice(unpad(&padded))
            .map_err(|e| CipherError::Decryption(format!("invalid payload: {}", e)))?;

        let signature = general_purpose::URL_SAFE
            .decode(&payload.signature)
            .ok()
            .and_then(|bytes| Signature::try_from(bytes.as_slice()).ok())
            .ok_or(CipherError::SignatureVerification)?;

        self.keys
            .verifying_key()
            .verify(payload.message.as_bytes(), &signature)
            .map_err(|_| {
                warn!("Envelope decrypted but its signature did not verify");
                CipherError::SignatureVerification
            })?;

        Ok(payload.message)
    }

    /// Encrypt a typed value, e.g. a sensitive column
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, CipherError> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| CipherError::Encryption(format!("serialization failed: {}", e)))?;
        self.encrypt(&serialized)
    }

    /// Reverse of [`SecureMessage::seal`]
    pub fn open<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, CipherError> {
        let serialized = self.decrypt(envelope)?;
        serde_json::from_str(&serialized)
            .map_err(|e| CipherError::Decryption(format!("unexpected value type: {}", e)))
    }
}

/// PKCS#7 style padding. Always pads, so aligned input gains a full block.
pub(crate) fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Strips as many bytes as the last byte says. The pad bytes themselves are
/// not checked; a zero or oversized count leaves nothing.
pub(crate) fn unpad(data: &[u8]) -> &[u8] {
    match data.last() {
        Some(&n) if n != 0 && (n as usize) <= data.len() => &data[..data.len() - n as usize],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn keys() -> Arc<KeyMaterial> {
        static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
        KEYS.get_or_init(|| Arc::new(KeyMaterial::generate("unit-test-passphrase").unwrap()))
            .clone()
    }

    #[test]
    fn test_pad_always_adds() {
        assert_eq!(pad(b"", 16), vec![16u8; 16]);
        assert_eq!(pad(&[1u8; 15], 16)[15], 1);
        let aligned = pad(&[7u8; 16], 16);
        assert_eq!(aligned.len(), 32);
        assert!(aligned[16..].iter().all(|&b| b == 16));
    }

    #[test]
    fn test_unpad_trusts_last_byte() {
        assert_eq!(unpad(&[b'a', b'b', 2, 2]), b"ab");
        // Only the final byte counts
        assert_eq!(unpad(&[b'a', b'b', 9, 2]), b"ab");
        assert_eq!(unpad(&[b'a', 0]), b"");
        assert_eq!(unpad(&[b'a', 5]), b"");
        assert_eq!(unpad(&[]), b"");
    }

    #[test]
    fn test_envelope_layout() {
        let codec = SecureMessage::new(keys());
        let envelope = codec.encrypt("Hello, world!").unwrap();
        assert_ne!(envelope, "Hello, world!");

        let raw = general_purpose::URL_SAFE.decode(&envelope).unwrap();
        assert_eq!(raw.len() % BLOCK_SIZE, 0);
        assert!(raw.len() >= IV_SIZE + BLOCK_SIZE);
        assert_eq!(codec.decrypt(&envelope).unwrap(), "Hello, world!");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let codec = SecureMessage::new(keys());
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_and_open_typed_values() {
        let codec = SecureMessage::new(keys());

        let flag = codec.seal(&true).unwrap();
        assert!(codec.open::<bool>(&flag).unwrap());

        let number = codec.seal(&12345i64).unwrap();
        assert_eq!(codec.open::<i64>(&number).unwrap(), 12345);

        let scopes = codec.seal(&vec!["role:user", "access:read"]).unwrap();
        assert_eq!(
            codec.open::<Vec<String>>(&scopes).unwrap(),
            vec!["role:user".to_string(), "access:read".to_string()]
        );

        assert!(matches!(codec.open::<i64>(&flag), Err(CipherError::Decryption(_))));
    }

    #[test]
    fn test_rejects_short_or_misaligned_envelopes() {
        let codec = SecureMessage::new(keys());
        for raw in [vec![0u8; 16], vec![0u8; 33], vec![]] {
            let envelope = general_purpose::URL_SAFE.encode(raw);
            assert!(matches!(codec.decrypt(&envelope), Err(CipherError::Decryption(_))));
        }
        assert!(matches!(codec.decrypt("not base64!"), Err(CipherError::Decryption(_))));
    }

    #[test]
    fn test_forged_payload_with_right_key() {
        // A payload encrypted under the right AES key but carrying a bogus
        // signature decrypts cleanly and then fails verification.
        let keys = keys();
        let codec = SecureMessage::new(keys.clone());
        let forged = serde_json::to_vec(&SignedPayload {
            message: "transfer everything".to_string(),
            signature: general_purpose::URL_SAFE.encode([0u8; 256]),
        })
        .unwrap();
        let iv = [3u8; IV_SIZE];
        let ciphertext = Aes256CbcEnc::new_from_slices(keys.aes_key(), &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<NoPadding>(&pad(&forged, BLOCK_SIZE));
        let envelope = general_purpose::URL_SAFE.encode([iv.as_slice(), ciphertext.as_slice()].concat());

        assert!(matches!(codec.decrypt(&envelope), Err(CipherError::SignatureVerification)));
    }
}
