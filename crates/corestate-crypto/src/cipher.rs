//! The at-rest cipher envelope (spec §4.8, invariant vi): derive a
//! content key from the private key and a per-instance salt (SHA-256 of
//! the account id), zstd-compress payloads over the compression
//! threshold, then AEAD-seal. The envelope is `nonce(12) || ciphertext`,
//! where the sealed plaintext is itself `flag(1) || body`.

use crate::error::CryptoError;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

/// Payloads at or above this size are zstd-compressed before encryption
/// (spec §4.2, §4.8).
pub const COMPRESSION_THRESHOLD: usize = 2048;

const FLAG_PLAIN: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;
const NONCE_LEN: usize = 12;

fn derive_content_key(key_material: &[u8], salt: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let mut out = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(key_material, salt, &mut out)
        .map_err(|e| CryptoError::InvalidKey(format!("key derivation failed: {e}")))?;
    Ok(out)
}

/// Derives the per-instance salt: SHA-256 of the account id (spec §4.8).
pub fn account_salt(account_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.finalize().into()
}

/// The compression-aware, AEAD envelope cipher. Encrypts with the
/// content key derived from the private key; decrypts with that key or,
/// failing that, any configured public key's derived key, so rotated-out
/// keys kept around as `public-key-files` can still decrypt old data
/// (spec §4.8).
pub struct ContentCipher {
    primary: [u8; 32],
    fallbacks: Vec<[u8; 32]>,
}

impl ContentCipher {
    /// Builds a cipher from the loaded private key, the account id (for
    /// salting), and zero or more additional recognized public keys.
    pub fn new(
        private_key: &[u8],
        account_id: &str,
        public_keys: &[Vec<u8>],
    ) -> Result<Self, CryptoError> {
        let salt = account_salt(account_id);
        let primary = derive_content_key(private_key, &salt)?;
        let fallbacks = public_keys
            .iter()
            .map(|pk| derive_content_key(pk, &salt))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { primary, fallbacks })
    }

    /// Encrypts `plaintext`, compressing first if it is at or above
    /// [`COMPRESSION_THRESHOLD`] (invariant vi).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (flag, body) = if plaintext.len() >= COMPRESSION_THRESHOLD {
            (FLAG_COMPRESSED, zstd::encode_all(plaintext, 0).map_err(|e| {
                CryptoError::CipherFailed(format!("zstd compression failed: {e}"))
            })?)
        } else {
            (FLAG_PLAIN, plaintext.to_vec())
        };
        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(flag);
        framed.extend_from_slice(&body);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.primary));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, framed.as_ref())
            .map_err(|_| CryptoError::CipherFailed("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts an envelope produced by [`ContentCipher::encrypt`], trying
    /// the primary key first and then every fallback key.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if envelope.len() < NONCE_LEN {
            return Err(CryptoError::MalformedEnvelope("envelope shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut last_err = None;
        for key in std::iter::once(&self.primary).chain(self.fallbacks.iter()) {
            let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
            match cipher.decrypt(nonce, ciphertext) {
                Ok(framed) => return Self::unframe(&framed),
                Err(e) => last_err = Some(e),
            }
        }
        let _ = last_err;
        Err(CryptoError::CipherFailed("no configured key could decrypt envelope".into()))
    }

    fn unframe(framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (flag, body) = framed
            .split_first()
            .ok_or_else(|| CryptoError::MalformedEnvelope("empty sealed body".into()))?;
        match *flag {
            FLAG_PLAIN => Ok(body.to_vec()),
            FLAG_COMPRESSED => zstd::decode_all(body)
                .map_err(|e| CryptoError::CipherFailed(format!("zstd decompression failed: {e}"))),
            other => Err(CryptoError::MalformedEnvelope(format!("unknown frame flag {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ContentCipher {
        ContentCipher::new(b"super-secret-private-key-material", "acct-1", &[]).unwrap()
    }

    #[test]
    fn round_trips_small_payload_uncompressed() {
        let c = cipher();
        let plain = b"hello resource payload";
        let sealed = c.encrypt(plain).unwrap();
        assert_eq!(c.decrypt(&sealed).unwrap(), plain);
    }

    #[test]
    fn round_trips_large_payload_compressed() {
        let c = cipher();
        let plain = vec![7u8; COMPRESSION_THRESHOLD + 1024];
        let sealed = c.encrypt(&plain).unwrap();
        assert_eq!(c.decrypt(&sealed).unwrap(), plain);
        // Highly compressible input should shrink well below its own size.
        assert!(sealed.len() < plain.len());
    }

    #[test]
    fn fallback_public_key_can_decrypt_old_data() {
        let salt_account = "acct-1";
        let old_private = b"old-rotated-out-key";
        let new_private = b"new-current-key";
        let old_cipher = ContentCipher::new(old_private, salt_account, &[]).unwrap();
        let sealed = old_cipher.encrypt(b"payload from before rotation").unwrap();

        let new_cipher =
            ContentCipher::new(new_private, salt_account, &[old_private.to_vec()]).unwrap();
        assert_eq!(new_cipher.decrypt(&sealed).unwrap(), b"payload from before rotation");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let c1 = ContentCipher::new(b"key-one", "acct-1", &[]).unwrap();
        let c2 = ContentCipher::new(b"key-two", "acct-1", &[]).unwrap();
        let sealed = c1.encrypt(b"secret").unwrap();
        assert!(c2.decrypt(&sealed).is_err());
    }
}
