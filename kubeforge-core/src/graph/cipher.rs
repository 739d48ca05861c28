use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use zeroize::Zeroizing;

use crate::error::{ClusterError, Result};

const NONCE_LEN: usize = 12;
const KEY_INFO: &[u8] = b"kubeforge-graph-v1";

/// Authenticated encryption for persisted graphs. The output is the random
/// nonce followed by the ciphertext.
#[derive(Clone)]
pub struct GraphCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for GraphCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCipher").finish_non_exhaustive()
    }
}

impl GraphCipher {
    /// Derive the data key from an operator supplied secret via HKDF-SHA256.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(ClusterError::Crypto("graph encryption secret is empty".into()));
        }

        let hk = hkdf::Hkdf::<sha2::Sha256>::new(None, secret);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(KEY_INFO, &mut *okm)
            .map_err(|_| ClusterError::Crypto("HKDF expand failed".into()))?;
        let key = Key::<Aes256Gcm>::from_slice(&*okm);

        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| ClusterError::Crypto(format!("Encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(ClusterError::Crypto("encrypted payload too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| ClusterError::Crypto(format!("Decryption failed: {e}")))
    }
}
