use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Nonce prefix length of a stored token, in bytes.
const NONCE_LEN: usize = 12;

/// Cipher applied to message bodies before write and after read.
/// A stored token is base64(nonce || ciphertext); anything that does not
/// decode as such is treated as a legacy plaintext row and passed through.
pub struct MessageCipher {
    key: [u8; 32],
}

impl MessageCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(token))
    }

    /// Decrypt a stored value. Rows written before encryption was enabled
    /// are not base64 tokens and come back unchanged; a token that fails
    /// authentication is an error, which callers render as a sentinel
    /// rather than aborting the batch.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = match BASE64.decode(stored) {
            Ok(raw) if raw.len() > NONCE_LEN => raw,
            _ => return Ok(stored.to_string()),
        };

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Decrypted body is not UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = MessageCipher::new(generate_key());
        let body = "Hello from Parley!";

        let token = cipher.encrypt(body).unwrap();
        assert_ne!(token, body);

        let decrypted = cipher.decrypt(&token).unwrap();
        assert_eq!(decrypted, body);
    }

    #[test]
    fn wrong_key_fails() {
        let cipher1 = MessageCipher::new(generate_key());
        let cipher2 = MessageCipher::new(generate_key());

        let token = cipher1.encrypt("Secret message").unwrap();
        assert!(cipher2.decrypt(&token).is_err());
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = MessageCipher::new(generate_key());
        // Not valid base64 -> treated as a pre-encryption row.
        let decrypted = cipher.decrypt("just an old plaintext row").unwrap();
        assert_eq!(decrypted, "just an old plaintext row");
    }
}
