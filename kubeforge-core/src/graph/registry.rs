use std::{any::Any, collections::BTreeMap, fmt};

use serde_json::{Map, Value};

use crate::error::{ClusterError, Result};

use super::{Asset, AssetKind, Graph, assets};

type Decode = fn(Value) -> serde_json::Result<Box<dyn Asset>>;
type Encode = fn(&dyn Asset) -> Option<serde_json::Result<Value>>;

#[derive(Clone, Copy)]
struct Entry {
    kind: &'static str,
    decode: Decode,
    encode: Encode,
}

fn decode_as<A: AssetKind>(value: Value) -> serde_json::Result<Box<dyn Asset>> {
    Ok(Box::new(serde_json::from_value::<A>(value)?))
}

fn encode_as<A: AssetKind>(asset: &dyn Asset) -> Option<serde_json::Result<Value>> {
    (asset as &dyn Any)
        .downcast_ref::<A>()
        .map(serde_json::to_value)
}

/// Closed table of asset kinds a graph may contain when persisted. Built once
/// at startup and shared read-only; loading a graph that names a kind missing
/// from the table is a hard error.
#[derive(Clone, Default)]
pub struct AssetRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every asset the installer produces.
    pub fn installer() -> Self {
        Self::new()
            .register::<assets::InstallConfig>()
            .register::<assets::SigningAuthority>()
            .register::<assets::AdminKubeconfig>()
            .register::<assets::BootstrapIgnition>()
    }

    pub fn register<A: AssetKind>(mut self) -> Self {
        self.entries.insert(
            A::KIND,
            Entry {
                kind: A::KIND,
                decode: decode_as::<A>,
                encode: encode_as::<A>,
            },
        );
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// JSON object keyed by asset kind.
    pub fn to_json(&self, graph: &Graph) -> Result<Vec<u8>> {
        let mut object = BTreeMap::new();
        for (kind, asset) in graph.iter() {
            let entry = self
                .entries
                .get(kind)
                .ok_or_else(|| ClusterError::UnregisteredAsset(kind.to_string()))?;
            let value = (entry.encode)(asset).ok_or_else(|| {
                ClusterError::Internal(format!("asset registered as {kind} has a different type"))
            })??;
            object.insert(kind, value);
        }
        Ok(serde_json::to_vec_pretty(&object)?)
    }

    pub fn from_json(&self, bytes: &[u8]) -> Result<Graph> {
        let object: Map<String, Value> = serde_json::from_slice(bytes)?;
        let mut graph = Graph::new();
        for (name, value) in object {
            let entry = self
                .entries
                .get(name.as_str())
                .ok_or(ClusterError::UnregisteredAsset(name))?;
            let asset = (entry.decode)(value)?;
            graph.insert_boxed(entry.kind, asset);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::graph::assets::{AdminKubeconfig, BootstrapIgnition, InstallConfig, SigningAuthority};

    fn install_config() -> InstallConfig {
        InstallConfig {
            cluster_name: "dev".into(),
            domain: "dev.example.com".into(),
            location: "eastus".into(),
            resource_group: "kubeforge-dev".into(),
            ssh_public_key: "ssh-ed25519 AAAA".into(),
            install_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid timestamp"),
        }
    }

    fn resolved_graph() -> Graph {
        let mut graph = Graph::new();
        graph.insert(install_config());
        graph
            .resolve(Box::new(BootstrapIgnition::default()))
            .expect("resolve bootstrap ignition");
        graph
    }

    #[test]
    fn round_trip_keeps_every_kind() {
        let registry = AssetRegistry::installer();
        let graph = resolved_graph();

        let bytes = registry.to_json(&graph).expect("serialize graph");
        let loaded = registry.from_json(&bytes).expect("deserialize graph");

        assert_eq!(loaded.kinds(), graph.kinds());
        assert_eq!(
            loaded.get::<SigningAuthority>().map(|ca| ca.public_key.clone()),
            graph.get::<SigningAuthority>().map(|ca| ca.public_key.clone())
        );
        assert_eq!(
            loaded.get::<AdminKubeconfig>().map(|k| k.contents.clone()),
            graph.get::<AdminKubeconfig>().map(|k| k.contents.clone())
        );
    }

    #[test]
    fn json_is_keyed_by_kind() {
        let registry = AssetRegistry::installer();
        let bytes = registry.to_json(&resolved_graph()).expect("serialize graph");
        let value: Value = serde_json::from_slice(&bytes).expect("valid json");

        let object = value.as_object().expect("object");
        assert!(object.contains_key(InstallConfig::KIND));
        assert!(object.contains_key(BootstrapIgnition::KIND));
    }

    #[test]
    fn unregistered_kind_fails_to_load() {
        let registry = AssetRegistry::installer();
        let raw = br#"{"kubeforge.assets.FutureThing": {"anything": true}}"#;

        match registry.from_json(raw) {
            Err(ClusterError::UnregisteredAsset(name)) => {
                assert_eq!(name, "kubeforge.assets.FutureThing");
            }
            other => panic!("expected unregistered asset error, got {other:?}"),
        }
    }

    #[test]
    fn unregistered_kind_fails_to_save() {
        let registry = AssetRegistry::new().register::<InstallConfig>();
        let err = registry.to_json(&resolved_graph()).expect_err("partial registry");
        assert!(matches!(err, ClusterError::UnregisteredAsset(_)));
    }
}
