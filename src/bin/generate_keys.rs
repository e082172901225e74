use anyhow::Result;
use base64::{Engine as _, engine::general_purpose};
use rand::{RngCore, rngs::OsRng};

use gcapi_security::security::keys::{export_pem, generate_rsa_keypair};

fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    general_purpose::STANDARD.encode(&bytes)
}

fn main() -> Result<()> {
    println!("Generating key material...\n");

    let encryption_key = random_base64(32);
    let secret_key = random_base64(48);

    let (private_key, _) = generate_rsa_keypair()?;
    let (private_pem, public_pem) = export_pem(&private_key)?;

    println!("Add these to your environment as:");
    println!("API_ENCRYPTION_KEY={}", encryption_key);
    println!("API_SECRET_KEY={}", secret_key);

    println!("\nSave the private key to the file named by API_RSA_PRIVATE_KEY_PATH:");
    println!("{}", private_pem.as_str());
    println!("Save the public key to the file named by API_RSA_PUBLIC_KEY_PATH:");
    println!("{}", public_pem);

    println!("\n⚠️  SECURITY WARNING:");
    println!("- Envelopes sealed under one keypair cannot be opened with another");
    println!("- Changing API_ENCRYPTION_KEY makes existing envelopes unreadable");
    println!("- Use different keys for dev/staging/production");

    Ok(())
}
