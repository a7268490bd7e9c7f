use blake3::Hasher;
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::domain::FileId;
use crate::error::{Result, ScatterError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Domain tag mixed into every chunk nonce.
const CHUNK_NONCE_TAG: &[u8] = b"scatter/chunk-nonce/v1";

/// Per-file symmetric key. Never shared between files.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey(pub [u8; KEY_LEN]);

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileKey(..)")
    }
}

impl FileKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ScatterError::Crypto(format!(
                "file key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }
}

/// Stateless XChaCha20-Poly1305 engine. All per-chunk state is derived
/// from `(file_id, index)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CipherEngine;

impl CipherEngine {
    pub fn generate_key() -> Result<FileKey> {
        let mut k = [0u8; KEY_LEN];
        getrandom::getrandom(&mut k)
            .map_err(|e| ScatterError::Crypto(format!("key generation: {e}")))?;
        Ok(FileKey(k))
    }

    /// nonce = blake3(tag || file_id || index).take(24)
    pub fn derive_nonce(file_id: FileId, index: u64) -> XNonce {
        let mut h = Hasher::new();
        h.update(CHUNK_NONCE_TAG);
        h.update(&file_id.0.to_le_bytes());
        h.update(&index.to_le_bytes());
        let out = h.finalize();
        XNonce::from_slice(&out.as_bytes()[..NONCE_LEN]).to_owned()
    }

    pub fn encrypt_chunk(
        &self,
        key: &FileKey,
        file_id: FileId,
        index: u64,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, XNonce)> {
        let nonce = Self::derive_nonce(file_id, index);
        let aad = chunk_aad(file_id, index);
        let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
        let ct = aead
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ScatterError::Crypto(format!("encrypt failed for chunk {index}")))?;
        Ok((ct, nonce))
    }

    /// Fails with `Crypto` when the tag does not authenticate, including when
    /// a chunk is presented under a different `(file_id, index)`.
    pub fn decrypt_chunk(
        &self,
        key: &FileKey,
        nonce: &XNonce,
        file_id: FileId,
        index: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_LEN {
            return Err(ScatterError::Crypto(format!(
                "chunk {index}: ciphertext shorter than tag ({} bytes)",
                ciphertext.len()
            )));
        }
        let aad = chunk_aad(file_id, index);
        let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
        aead.decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| ScatterError::Crypto(format!("chunk {index}: authentication failed")))
    }
}

fn chunk_aad(file_id: FileId, index: u64) -> [u8; 16] {
    let mut ad = [0u8; 16];
    ad[..8].copy_from_slice(&file_id.0.to_le_bytes());
    ad[8..].copy_from_slice(&index.to_le_bytes());
    ad
}

/// Hex BLAKE3 digest; used as the stored checksum of encrypted chunks.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}
