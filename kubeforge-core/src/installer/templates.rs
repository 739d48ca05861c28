//! Template skeletons submitted by the installer. Resource bodies belong to
//! the deployment tooling; the engine only supplies the parameters it owns.

use kubeforge_model::ClusterDocument;
use serde_json::{Value, json};

use crate::{
    error::Result,
    graph::{Graph, assets::InstallConfig},
};

const SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#";

fn template(parameters: &[&str], resources: Value) -> Value {
    let parameters: serde_json::Map<String, Value> = parameters
        .iter()
        .map(|name| ((*name).to_string(), json!({ "type": "string" })))
        .collect();
    json!({
        "$schema": SCHEMA,
        "contentVersion": "1.0.0.0",
        "parameters": parameters,
        "resources": resources,
    })
}

fn parameter_values(values: &[(&str, &str)]) -> Value {
    let values: serde_json::Map<String, Value> = values
        .iter()
        .map(|(name, value)| ((*name).to_string(), json!({ "value": value })))
        .collect();
    Value::Object(values)
}

/// Storage account and the containers graph and ignition blobs live in.
pub fn storage(doc: &ClusterDocument) -> (Value, Value) {
    let props = &doc.cluster.properties;
    let account = format!("cluster{}", props.storage_suffix);
    let template = template(
        &["storageAccountName", "location"],
        json!([{
            "type": "Microsoft.Storage/storageAccounts",
            "name": "[parameters('storageAccountName')]",
            "location": "[parameters('location')]",
            "kind": "StorageV2",
        }]),
    );
    let parameters = parameter_values(&[
        ("storageAccountName", account.as_str()),
        ("location", doc.cluster.location.as_str()),
    ]);
    (template, parameters)
}

/// Control plane and bootstrap machine.
pub fn resources(doc: &ClusterDocument, graph: &Graph) -> Result<(Value, Value)> {
    let config = graph.require::<InstallConfig>()?;
    let props = &doc.cluster.properties;
    let ignition_url = format!(
        "https://cluster{}.blob.core.windows.net/ignition/bootstrap.ign",
        props.storage_suffix
    );

    let template = template(
        &["clusterName", "location", "sshPublicKey", "bootstrapIgnitionUrl"],
        json!([
            {
                "type": "Microsoft.Compute/virtualMachines",
                "name": "bootstrap",
                "location": "[parameters('location')]",
            },
            {
                "type": "Microsoft.Compute/virtualMachines",
                "name": "[concat(parameters('clusterName'), '-master-', copyIndex())]",
                "location": "[parameters('location')]",
                "copy": { "name": "masters", "count": 3 },
            },
        ]),
    );
    let parameters = parameter_values(&[
        ("clusterName", config.cluster_name.as_str()),
        ("location", config.location.as_str()),
        ("sshPublicKey", config.ssh_public_key.as_str()),
        ("bootstrapIgnitionUrl", ignition_url.as_str()),
    ]);
    Ok((template, parameters))
}

/// Resources deleted once the control plane no longer needs the bootstrap
/// machine.
pub const BOOTSTRAP_RESOURCES: [&str; 3] = ["bootstrap", "bootstrap-nic", "bootstrap-pip"];
