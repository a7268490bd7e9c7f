use argon2::Argon2;
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use super::aead::{FileKey, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::{Result, ScatterError};

const WRAP_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const WRAP_AAD: &[u8] = b"scatter/file-key";

/// Length of a wrapped key blob: version || salt || nonce || sealed key.
pub const WRAPPED_LEN: usize = 1 + SALT_LEN + NONCE_LEN + KEY_LEN + TAG_LEN;

/// Passphrase-derived key that seals per-file keys before they are persisted.
pub struct MasterKey {
    passphrase: String,
}

impl MasterKey {
    pub fn from_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let pass = std::env::var(var).map_err(|_| {
            ScatterError::Config(format!("master passphrase variable '{var}' is not set"))
        })?;
        if pass.is_empty() {
            return Err(ScatterError::Config(format!(
                "master passphrase variable '{var}' is empty"
            )));
        }
        Ok(Self::from_passphrase(pass))
    }

    fn derive(&self, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut out = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut out)
            .map_err(|e| ScatterError::Crypto(format!("argon2: {e}")))?;
        Ok(out)
    }

    pub fn wrap(&self, key: &FileKey) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut salt)
            .and_then(|_| getrandom::getrandom(&mut nonce))
            .map_err(|e| ScatterError::Crypto(format!("wrap randomness: {e}")))?;

        let kek = self.derive(&salt)?;
        let aead = XChaCha20Poly1305::new(Key::from_slice(&kek));
        let sealed = aead
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &key.0,
                    aad: WRAP_AAD,
                },
            )
            .map_err(|_| ScatterError::Crypto("file key wrap failed".into()))?;

        let mut blob = Vec::with_capacity(WRAPPED_LEN);
        blob.push(WRAP_VERSION);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    pub fn unwrap(&self, blob: &[u8]) -> Result<FileKey> {
        if blob.len() != WRAPPED_LEN || blob[0] != WRAP_VERSION {
            return Err(ScatterError::Crypto("malformed wrapped file key".into()));
        }
        let salt = &blob[1..1 + SALT_LEN];
        let nonce = &blob[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN];
        let sealed = &blob[1 + SALT_LEN + NONCE_LEN..];

        let kek = self.derive(salt)?;
        let aead = XChaCha20Poly1305::new(Key::from_slice(&kek));
        let raw = aead
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: WRAP_AAD,
                },
            )
            .map_err(|_| ScatterError::Crypto("file key unwrap failed: wrong passphrase?".into()))?;
        FileKey::from_slice(&raw)
    }
}

/// Bytes to persist for `key`: wrapped under `master` when one is configured.
pub fn seal_file_key(master: Option<&MasterKey>, key: &FileKey) -> Result<Vec<u8>> {
    match master {
        Some(m) => m.wrap(key),
        None => Ok(key.0.to_vec()),
    }
}

pub fn open_file_key(master: Option<&MasterKey>, blob: &[u8]) -> Result<FileKey> {
    match (master, blob.len()) {
        (_, KEY_LEN) => FileKey::from_slice(blob),
        (Some(m), WRAPPED_LEN) => m.unwrap(blob),
        (None, WRAPPED_LEN) => Err(ScatterError::Crypto(
            "file key is wrapped but no master passphrase is configured".into(),
        )),
        (_, n) => Err(ScatterError::Crypto(format!("stored file key has bad length {n}"))),
    }
}
