//! Credentials generated once per installation and kept on the document.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::SigningKey;
use kubeforge_model::ClusterProperties;
use rand::{Rng, RngCore, distr::Alphanumeric};
use zeroize::Zeroizing;

use crate::error::{ClusterError, Result};

const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 5;
const PASSWORD_LEN: usize = 32;

/// Freshly generated candidates. Only the ones missing from the document are
/// applied, so a phase retried after a partial run keeps what running
/// infrastructure already uses.
#[derive(Clone)]
pub struct ClusterSecrets {
    ssh_key: String,
    storage_suffix: String,
    registry_password: String,
}

impl std::fmt::Debug for ClusterSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSecrets")
            .field("storage_suffix", &self.storage_suffix)
            .finish_non_exhaustive()
    }
}

impl ClusterSecrets {
    pub fn generate() -> Self {
        let mut rng = rand::rng();

        let mut secret = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *secret);

        let storage_suffix = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();

        let registry_password = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect();

        Self {
            ssh_key: BASE64.encode(*secret),
            storage_suffix,
            registry_password,
        }
    }

    /// Fill in whatever `props` lacks. Returns true if anything changed.
    pub fn apply_missing(&self, props: &mut ClusterProperties) -> bool {
        let mut changed = false;
        if props.ssh_key.is_none() {
            props.ssh_key = Some(self.ssh_key.clone());
            changed = true;
        }
        if props.storage_suffix.is_empty() {
            props.storage_suffix = self.storage_suffix.clone();
            changed = true;
        }
        if props.registry_password.is_none() {
            props.registry_password = Some(self.registry_password.clone());
            changed = true;
        }
        changed
    }
}

/// `authorized_keys` line for the base64 encoded ed25519 private key.
pub fn ssh_public_key(private_key: &str) -> Result<String> {
    let bytes = Zeroizing::new(
        BASE64
            .decode(private_key)
            .map_err(|e| ClusterError::Crypto(format!("invalid ssh key: {e}")))?,
    );
    let secret: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ClusterError::Crypto("ssh key must be 32 bytes".into()))?;
    let public = SigningKey::from_bytes(&secret).verifying_key();

    const KEY_TYPE: &[u8] = b"ssh-ed25519";
    let mut wire = Vec::with_capacity(4 + KEY_TYPE.len() + 4 + 32);
    wire.extend_from_slice(&(KEY_TYPE.len() as u32).to_be_bytes());
    wire.extend_from_slice(KEY_TYPE);
    wire.extend_from_slice(&32u32.to_be_bytes());
    wire.extend_from_slice(public.as_bytes());

    Ok(format!("ssh-ed25519 {}", BASE64.encode(wire)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_values_have_expected_shape() {
        let secrets = ClusterSecrets::generate();
        assert_eq!(secrets.storage_suffix.len(), SUFFIX_LEN);
        assert!(
            secrets
                .storage_suffix
                .bytes()
                .all(|b| SUFFIX_ALPHABET.contains(&b))
        );
        assert_eq!(secrets.registry_password.len(), PASSWORD_LEN);
        assert!(secrets.registry_password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(ssh_public_key(&secrets.ssh_key).is_ok());
    }

    #[test]
    fn existing_values_are_kept() {
        let mut props = ClusterProperties {
            ssh_key: Some("existing-key".into()),
            storage_suffix: "abcde".into(),
            registry_password: Some("existing-password".into()),
            ..ClusterProperties::default()
        };

        assert!(!ClusterSecrets::generate().apply_missing(&mut props));
        assert_eq!(props.ssh_key.as_deref(), Some("existing-key"));
        assert_eq!(props.storage_suffix, "abcde");
        assert_eq!(props.registry_password.as_deref(), Some("existing-password"));
    }

    #[test]
    fn missing_values_are_filled() {
        let mut props = ClusterProperties::default();
        assert!(ClusterSecrets::generate().apply_missing(&mut props));
        assert!(props.ssh_key.is_some());
        assert_eq!(props.storage_suffix.len(), SUFFIX_LEN);
        assert!(props.registry_password.is_some());
    }

    #[test]
    fn public_key_is_stable_for_a_private_key() {
        let key = BASE64.encode([7u8; 32]);
        let first = ssh_public_key(&key).expect("public key");
        assert_eq!(first, ssh_public_key(&key).expect("public key"));
        assert!(first.starts_with("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5"));
        assert!(ssh_public_key("not base64!").is_err());
    }
}
