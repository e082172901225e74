use base64::{Engine as _, engine::general_purpose};
use std::sync::{Arc, OnceLock};

use gcapi_security::security::{
    keys::generate_rsa_keypair, CipherError, KeyMaterial, SecureMessage,
};

const PASSPHRASE: &str = "hNaZZH07R5yxXsbE1mEVPERNOJZwyb/O+jlhqonG2I0=";

fn key_material() -> Arc<KeyMaterial> {
    static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyMaterial::generate(PASSPHRASE).unwrap()))
        .clone()
}

fn codec() -> SecureMessage {
    SecureMessage::new(key_material())
}

#[test]
fn round_trip_across_block_boundaries() {
    let codec = codec();
    for len in [0usize, 1, 15, 16, 17, 31, 32, 33, 255, 1024] {
        let plaintext = "x".repeat(len);
        let envelope = codec.encrypt(&plaintext).unwrap();
        assert_eq!(codec.decrypt(&envelope).unwrap(), plaintext, "length {}", len);
    }
}

#[test]
fn round_trip_preserves_unicode_and_json_metacharacters() {
    let codec = codec();
    let plaintext = "héllo \"wörld\" \\ {\"nested\": [1, 2]} \u{1F512}\n\t";
    let envelope = codec.encrypt(plaintext).unwrap();
    assert_eq!(codec.decrypt(&envelope).unwrap(), plaintext);
}

#[test]
fn envelope_is_url_safe_base64() {
    let envelope = codec().encrypt("Hello, world!").unwrap();
    assert!(envelope
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
}

#[test]
fn any_single_byte_tamper_is_rejected() {
    let codec = codec();
    let envelope = codec.encrypt("transfer 100 credits to account 42").unwrap();
    let raw = general_purpose::URL_SAFE.decode(&envelope).unwrap();

    for i in 0..raw.len() {
        let mut tampered = raw.clone();
        tampered[i] ^= 0x01;
        let tampered = general_purpose::URL_SAFE.encode(&tampered);
        assert!(codec.decrypt(&tampered).is_err(), "tamper at byte {} accepted", i);
    }
}

#[test]
fn truncated_or_garbage_envelopes_are_decryption_errors() {
    let codec = codec();
    let envelope = codec.encrypt("Hello, world!").unwrap();

    let truncated = &envelope[..envelope.len() / 2];
    assert!(matches!(codec.decrypt(truncated), Err(CipherError::Decryption(_))));
    assert!(matches!(codec.decrypt("not base64 at all!"), Err(CipherError::Decryption(_))));
    assert!(matches!(codec.decrypt(""), Err(CipherError::Decryption(_))));
}

#[test]
fn wrong_aes_key_is_a_decryption_error() {
    let sender = codec();
    let envelope = sender.encrypt("Hello, world!").unwrap();

    let keys = key_material();
    let (private_key, public_key) = generate_rsa_keypair().unwrap();
    let other = KeyMaterial::from_keys("a-completely-different-passphrase", private_key, public_key);
    let receiver = SecureMessage::new(Arc::new(other));

    assert!(matches!(
        receiver.decrypt(&envelope),
        Err(CipherError::Decryption(_))
    ));
    // The sender's own keys still work
    assert_eq!(SecureMessage::new(keys).decrypt(&envelope).unwrap(), "Hello, world!");
}

#[test]
fn wrong_verifying_key_is_a_signature_error() {
    let sender = codec();
    let envelope = sender.encrypt("Hello, world!").unwrap();

    let (_, stranger) = generate_rsa_keypair().unwrap();
    let receiver = SecureMessage::new(Arc::new(key_material().with_verifying_key(stranger)));

    assert!(matches!(
        receiver.decrypt(&envelope),
        Err(CipherError::SignatureVerification)
    ));
}

#[test]
fn independent_key_material_does_not_interoperate() {
    let a = SecureMessage::new(key_material());
    let b = SecureMessage::new(Arc::new(KeyMaterial::generate(PASSPHRASE).unwrap()));

    // Same passphrase, different signing keys
    let envelope = a.encrypt("Hello, world!").unwrap();
    assert!(matches!(
        b.decrypt(&envelope),
        Err(CipherError::SignatureVerification)
    ));
}
