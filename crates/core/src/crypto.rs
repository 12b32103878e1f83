//! Passphrase encryption for backup payloads.
//!
//! Payload text is `base64(version | salt | nonce | ciphertext+tag)`. The key is
//! derived from the secret with Argon2id over a per-payload salt, and the body is
//! sealed with XChaCha20-Poly1305, so a wrong secret fails authentication instead
//! of yielding garbage.

use argon2::Argon2;
use base64::Engine;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
};

use crate::{Error, Result};

pub const FRAMING_VERSION: u8 = 0x01;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;
const PAYLOAD_AAD: &[u8] = b"scoopbackup.payload.v1";

/// Holds the host-supplied secret. `None` and `""` both mean "not configured".
#[derive(Clone, Default)]
pub struct Cipher {
    secret: Option<String>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Cipher {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        encrypt_text(plaintext, self.secret.as_deref().unwrap_or_default())
    }

    pub fn decrypt(&self, payload: &str) -> Result<String> {
        decrypt_text(payload, self.secret.as_deref().unwrap_or_default())
    }
}

pub fn encrypt_text(plaintext: &str, secret: &str) -> Result<String> {
    ensure_secret(secret)?;

    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| Error::Encryption {
        message: format!("getrandom failed: {e}"),
    })?;
    let key = derive_key(secret, &salt).map_err(|message| Error::Encryption { message })?;

    let cipher = XChaCha20Poly1305::new((&key).into());
    let nonce: XNonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.as_bytes().to_vec();
    cipher
        .encrypt_in_place(&nonce, PAYLOAD_AAD, &mut buffer)
        .map_err(|_| Error::Encryption {
            message: "aead seal failed".to_string(),
        })?;

    let mut framed = Vec::with_capacity(HEADER_LEN + buffer.len());
    framed.push(FRAMING_VERSION);
    framed.extend_from_slice(&salt);
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&buffer);
    Ok(base64::engine::general_purpose::STANDARD.encode(framed))
}

pub fn decrypt_text(payload: &str, secret: &str) -> Result<String> {
    ensure_secret(secret)?;

    let framed = base64::engine::general_purpose::STANDARD
        .decode(payload.trim().as_bytes())
        .map_err(|_| Error::Decryption)?;
    if framed.len() < HEADER_LEN || framed[0] != FRAMING_VERSION {
        return Err(Error::Decryption);
    }

    let salt = &framed[1..1 + SALT_LEN];
    let nonce = XNonce::from_slice(&framed[1 + SALT_LEN..HEADER_LEN]);
    let key = derive_key(secret, salt).map_err(|_| Error::Decryption)?;

    let cipher = XChaCha20Poly1305::new((&key).into());
    let mut buffer = framed[HEADER_LEN..].to_vec();
    cipher
        .decrypt_in_place(nonce, PAYLOAD_AAD, &mut buffer)
        .map_err(|_| Error::Decryption)?;

    String::from_utf8(buffer).map_err(|_| Error::Decryption)
}

fn ensure_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::config("encryption secret is not configured"));
    }
    Ok(())
}

fn derive_key(secret: &str, salt: &[u8]) -> std::result::Result<[u8; 32], String> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(secret.as_bytes(), salt, &mut key)
        .map_err(|e| format!("key derivation failed: {e}"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let plain = r#"{"buckets":[{"Name":"main"}],"apps":[]}"#;
        let enc = encrypt_text(plain, "hunter2").unwrap();
        assert_ne!(enc, plain);
        assert_eq!(decrypt_text(&enc, "hunter2").unwrap(), plain);
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        assert!(matches!(
            encrypt_text("x", ""),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            decrypt_text("AAAA", ""),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            Cipher::new(None).encrypt("x"),
            Err(Error::Configuration { .. })
        ));
        assert!(!Cipher::new(None).is_configured());
        assert!(!Cipher::new(Some(String::new())).is_configured());
        assert!(Cipher::new(Some("k".to_string())).is_configured());
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let enc = encrypt_text("hello", "right").unwrap();
        assert!(matches!(decrypt_text(&enc, "wrong"), Err(Error::Decryption)));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        assert!(matches!(
            decrypt_text("not base64 at all!", "k"),
            Err(Error::Decryption)
        ));
        assert!(matches!(decrypt_text("AQID", "k"), Err(Error::Decryption)));

        let enc = encrypt_text("hello", "k").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(enc.as_bytes())
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(matches!(decrypt_text(&tampered, "k"), Err(Error::Decryption)));
    }

    #[test]
    fn each_encryption_uses_fresh_salt_and_nonce() {
        let a = encrypt_text("same", "k").unwrap();
        let b = encrypt_text("same", "k").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let text = format!("{:?}", Cipher::new(Some("topsecret".to_string())));
        assert!(!text.contains("topsecret"));
    }
}
