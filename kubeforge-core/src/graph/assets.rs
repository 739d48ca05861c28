use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{ClusterError, Result};

use super::{Asset, AssetKind, Graph};

/// Cluster parameters copied from the document before resolution starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallConfig {
    pub cluster_name: String,
    pub domain: String,
    pub location: String,
    pub resource_group: String,
    pub ssh_public_key: String,
    pub install_time: DateTime<Utc>,
}

impl Asset for InstallConfig {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn generate(&mut self, _: &Graph) -> Result<()> {
        Err(ClusterError::Internal(
            "install config must be seeded from the cluster document".into(),
        ))
    }
}

impl AssetKind for InstallConfig {
    const KIND: &'static str = "kubeforge.assets.InstallConfig";
}

/// Key pair every other credential in the graph is signed with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningAuthority {
    pub secret_key: String,
    pub public_key: String,
    pub fingerprint: String,
}

impl SigningAuthority {
    pub fn signing_key(&self) -> Result<SigningKey> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(&self.secret_key)
                .map_err(|e| ClusterError::Crypto(format!("invalid signing key: {e}")))?,
        );
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ClusterError::Crypto("signing key must be 32 bytes".into()))?;
        Ok(SigningKey::from_bytes(&secret))
    }
}

impl Asset for SigningAuthority {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn generate(&mut self, _: &Graph) -> Result<()> {
        let mut secret = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut *secret);
        let key = SigningKey::from_bytes(&secret);
        let public = key.verifying_key().to_bytes();

        self.secret_key = BASE64.encode(key.to_bytes());
        self.public_key = BASE64.encode(public);
        self.fingerprint = Sha256::digest(public)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(())
    }
}

impl AssetKind for SigningAuthority {
    const KIND: &'static str = "kubeforge.assets.SigningAuthority";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminKubeconfig {
    pub server: String,
    pub token: String,
    pub contents: String,
}

impl Asset for AdminKubeconfig {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn dependencies(&self) -> Vec<Box<dyn Asset>> {
        vec![
            Box::new(InstallConfig::default()),
            Box::new(SigningAuthority::default()),
        ]
    }

    fn generate(&mut self, parents: &Graph) -> Result<()> {
        let config = parents.require::<InstallConfig>()?;
        let authority = parents.require::<SigningAuthority>()?;

        let claims = format!(
            "system:admin|{}|{}",
            config.cluster_name,
            config.install_time.to_rfc3339()
        );
        let signature = authority.signing_key()?.sign(claims.as_bytes());

        self.server = format!("https://api.{}.{}:6443", config.cluster_name, config.domain);
        self.token = format!(
            "{}.{}",
            BASE64.encode(claims.as_bytes()),
            BASE64.encode(signature.to_bytes())
        );
        self.contents = format!(
            "apiVersion: v1\n\
             kind: Config\n\
             clusters:\n\
             - name: {name}\n  cluster:\n    server: {server}\n    certificate-authority-data: {ca}\n\
             users:\n\
             - name: system:admin\n  user:\n    token: {token}\n\
             contexts:\n\
             - name: admin\n  context:\n    cluster: {name}\n    user: system:admin\n\
             current-context: admin\n",
            name = config.cluster_name,
            server = self.server,
            ca = authority.public_key,
            token = self.token,
        );
        Ok(())
    }
}

impl AssetKind for AdminKubeconfig {
    const KIND: &'static str = "kubeforge.assets.AdminKubeconfig";
}

/// First-boot payload for the bootstrap machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapIgnition {
    pub config: String,
}

impl Asset for BootstrapIgnition {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn dependencies(&self) -> Vec<Box<dyn Asset>> {
        vec![
            Box::new(InstallConfig::default()),
            Box::new(SigningAuthority::default()),
            Box::new(AdminKubeconfig::default()),
        ]
    }

    fn generate(&mut self, parents: &Graph) -> Result<()> {
        let config = parents.require::<InstallConfig>()?;
        let authority = parents.require::<SigningAuthority>()?;
        let kubeconfig = parents.require::<AdminKubeconfig>()?;

        let file = |path: &str, contents: &[u8]| {
            json!({
                "path": path,
                "mode": 0o600,
                "contents": { "source": format!("data:;base64,{}", BASE64.encode(contents)) },
            })
        };

        let ignition = json!({
            "ignition": { "version": "3.2.0" },
            "passwd": {
                "users": [{ "name": "core", "sshAuthorizedKeys": [config.ssh_public_key] }],
            },
            "storage": {
                "files": [
                    file("/etc/kubernetes/kubeconfig", kubeconfig.contents.as_bytes()),
                    file("/etc/kubeforge/authority.pub", authority.public_key.as_bytes()),
                    file("/etc/kubeforge/cluster", config.cluster_name.as_bytes()),
                ],
            },
        });

        self.config = serde_json::to_string(&ignition)?;
        Ok(())
    }
}

impl AssetKind for BootstrapIgnition {
    const KIND: &'static str = "kubeforge.assets.BootstrapIgnition";
}
