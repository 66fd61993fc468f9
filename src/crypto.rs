use std::path::Path;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;

use crate::error::{AbsHardcoverResult, SyncError};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
// GCM tag length; encrypted blobs are at least nonce + tag long.
const TAG_LEN: usize = 16;

pub const KEY_FILE_NAME: &str = "encryption.key";

/// AES-256-GCM cipher for profile tokens at rest. Blobs are stored as
/// base64(nonce || ciphertext || tag) so they fit in a text column.
#[derive(Clone)]
pub struct TokenCipher {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

impl TokenCipher {
    /// Resolve the key: `ENCRYPTION_KEY` env var (base64), then
    /// `<data_dir>/encryption.key`, then generate and persist one with
    /// owner-only permissions.
    pub fn load(data_dir: &Path) -> AbsHardcoverResult<Self> {
        if let Ok(encoded) = std::env::var("ENCRYPTION_KEY") {
            if !encoded.is_empty() {
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .context("ENCRYPTION_KEY is not valid base64")?;
                return Self::from_key_bytes(&bytes)
                    .context("ENCRYPTION_KEY must decode to 32 bytes");
            }
        }

        let key_path = data_dir.join(KEY_FILE_NAME);
        if key_path.exists() {
            let bytes = std::fs::read(&key_path)
                .with_context(|| format!("reading {}", key_path.display()))?;
            return Self::from_key_bytes(&bytes)
                .with_context(|| format!("{} is not a 32-byte key", key_path.display()));
        }

        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        std::fs::write(&key_path, bytes)
            .with_context(|| format!("writing {}", key_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("chmod 0600 {}", key_path.display()))?;
        }
        tracing::info!(path = %key_path.display(), "generated new encryption key");
        Self::from_key_bytes(&bytes)
    }

    pub fn from_key_bytes(bytes: &[u8]) -> AbsHardcoverResult<Self> {
        if bytes.len() != KEY_LEN {
            anyhow::bail!("expected {KEY_LEN}-byte key, got {}", bytes.len());
        }
        Ok(TokenCipher {
            key: *Key::<Aes256Gcm>::from_slice(bytes),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> AbsHardcoverResult<String> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("encryption failed"))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a stored blob. Any structural or authentication failure maps
    /// to `InvalidCiphertext`; callers log a key-mismatch hint, never the
    /// token itself.
    pub fn decrypt(&self, encoded: &str) -> Result<String, SyncError> {
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|_| SyncError::InvalidCiphertext)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(SyncError::InvalidCiphertext);
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SyncError::InvalidCiphertext)?;
        String::from_utf8(plain).map_err(|_| SyncError::InvalidCiphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher(byte: u8) -> TokenCipher {
        TokenCipher::from_key_bytes(&[byte; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trip_restores_plaintext() {
        let cipher = test_cipher(7);
        for token in ["", "short", "a much longer bearer token value 1234567890"] {
            let blob = cipher.encrypt(token).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), token);
        }
    }

    #[test]
    fn nonces_are_fresh_per_encryption() {
        let cipher = test_cipher(7);
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_invalid_ciphertext() {
        let blob = test_cipher(1).encrypt("secret").unwrap();
        let err = test_cipher(2).decrypt(&blob).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCiphertext));
    }

    #[test]
    fn tampered_blob_is_invalid_ciphertext() {
        let cipher = test_cipher(3);
        let blob = cipher.encrypt("secret").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = cipher.decrypt(&STANDARD.encode(raw)).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCiphertext));
    }

    #[test]
    fn garbage_blobs_are_invalid_ciphertext() {
        let cipher = test_cipher(4);
        assert!(matches!(
            cipher.decrypt("not base64 !!!"),
            Err(SyncError::InvalidCiphertext)
        ));
        // Valid base64 but shorter than nonce + tag.
        assert!(matches!(
            cipher.decrypt(&STANDARD.encode([0u8; 8])),
            Err(SyncError::InvalidCiphertext)
        ));
    }

    #[test]
    fn load_persists_and_reloads_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = TokenCipher::load(dir.path()).unwrap();
        let blob = first.encrypt("token").unwrap();

        let key_path = dir.path().join(KEY_FILE_NAME);
        assert_eq!(std::fs::read(&key_path).unwrap().len(), KEY_LEN);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let second = TokenCipher::load(dir.path()).unwrap();
        assert_eq!(second.decrypt(&blob).unwrap(), "token");
    }
}
