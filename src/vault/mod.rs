//! Symmetric encryption of exported token files.
//!
//! File layout: 12-byte random nonce followed by the AES-256-GCM ciphertext
//! (which carries its own 16-byte tag).

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;

pub struct FileCipher {
    key: [u8; 32],
}

impl FileCipher {
    pub fn new(key_hex: &str) -> anyhow::Result<Self> {
        let key = parse_master_key(key_hex)?;
        Ok(Self { key })
    }

    fn cipher(&self) -> anyhow::Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))
    }

    /// `nonce || ciphertext` for `plaintext`. Every call draws a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
        let nonce_bytes = generate_nonce();
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| anyhow::anyhow!("file encryption failed: {}", e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            anyhow::bail!("ciphertext too short");
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow::anyhow!("file decryption failed: {}", e))
    }
}

impl Drop for FileCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "AUTH_ENGINE_FILE_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let mut bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encryption_roundtrip() {
        let cipher = FileCipher::new(KEY).unwrap();
        let sealed = cipher.encrypt(br#"{"token":"sk-abc"}"#).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 18 + 16);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), br#"{"token":"sk-abc"}"#);
    }

    #[test]
    fn test_nonce_is_fresh_per_file() {
        let cipher = FileCipher::new(KEY).unwrap();
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_or_short_input_fails() {
        let cipher = FileCipher::new(KEY).unwrap();
        let mut sealed = cipher.encrypt(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(cipher.decrypt(&sealed).is_err());

        let err = cipher.decrypt(&[0u8; 5]).unwrap_err();
        assert_eq!(err.to_string(), "ciphertext too short");
    }

    #[test]
    fn test_master_key_must_be_64_hex_chars() {
        assert!(parse_master_key("abcd").is_err());
        assert!(parse_master_key(&"zz".repeat(32)).is_err());
        assert_eq!(parse_master_key(KEY).unwrap()[31], 0x1f);
    }
}
