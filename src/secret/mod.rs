//! Turns registry authorization entries into `kubernetes.io/dockerconfigjson` Secrets.

pub mod naming;

pub use naming::SecretTargets;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::AuthorizationEntry;

// Kubernetes label and annotation constants
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGER_NAME: &str = "ecr-k8s-secret-manager";
pub const ANNOTATION_EXPIRES_AT: &str = "ecr-k8s-secret-manager.io/expires-at";
pub const ANNOTATION_REGISTRY: &str = "ecr-k8s-secret-manager.io/registry";

pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// ECR only ever authenticates pulls as this user
pub const REGISTRY_USERNAME: &str = "AWS";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerRegistryAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DockerRegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerRegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of a `.dockerconfigjson` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfigJson {
    /// Registry endpoint -> credentials. Ordered so serialization is stable.
    pub auths: BTreeMap<String, DockerRegistryAuth>,
}

impl DockerConfigJson {
    pub fn for_entry(entry: &AuthorizationEntry) -> Self {
        let mut auths = BTreeMap::new();
        auths.insert(
            entry.endpoint.clone(),
            DockerRegistryAuth {
                username: REGISTRY_USERNAME.to_string(),
                password: entry.token.clone(),
            },
        );
        Self { auths }
    }

    /// Canonical byte form. Registries are emitted in sorted order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let auths: serde_json::Map<String, serde_json::Value> = self
            .auths
            .iter()
            .map(|(endpoint, auth)| {
                (
                    endpoint.clone(),
                    serde_json::json!({
                        "username": auth.username,
                        "password": auth.password,
                    }),
                )
            })
            .collect();

        serde_json::json!({ "auths": auths }).to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// A pull secret as this tool wants it to exist in the cluster
#[derive(Clone, PartialEq, Eq)]
pub struct ManagedSecret {
    pub name: String,
    pub namespace: String,
    /// Registry endpoint the credentials belong to
    pub endpoint: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Serialized [`DockerConfigJson`]
    pub payload: Vec<u8>,
}

impl fmt::Debug for ManagedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSecret")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("endpoint", &self.endpoint)
            .field("labels", &self.labels)
            .field("annotations", &self.annotations)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

impl ManagedSecret {
    /// Build the secret for one validated entry at one target
    pub fn from_entry(entry: &AuthorizationEntry, namespace: &str, name: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string());

        let mut annotations = BTreeMap::new();
        annotations.insert(
            ANNOTATION_EXPIRES_AT.to_string(),
            entry.expires_at.timestamp().to_string(),
        );
        annotations.insert(ANNOTATION_REGISTRY.to_string(), entry.endpoint.clone());

        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            endpoint: entry.endpoint.clone(),
            labels,
            annotations,
            payload: DockerConfigJson::for_entry(entry).to_bytes(),
        }
    }

    pub fn expires_at(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_EXPIRES_AT).map(String::as_str)
    }

    /// Full Secret object for a create call
    pub fn to_secret(&self) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(self.payload.clone()),
        );

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                annotations: Some(self.annotations.clone()),
                ..Default::default()
            },
            type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Whether `existing` already carries this secret's type, payload, expiry and owner label
    pub fn matches(&self, existing: &Secret) -> bool {
        let type_matches = existing.type_.as_deref() == Some(DOCKER_CONFIG_JSON_TYPE);

        let payload_matches = existing
            .data
            .as_ref()
            .and_then(|d| d.get(DOCKER_CONFIG_JSON_KEY))
            .is_some_and(|b| b.0 == self.payload);

        let expiry_matches = existing
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_EXPIRES_AT))
            .map(String::as_str)
            == self.expires_at();

        let owned = existing
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_MANAGED_BY))
            .is_some_and(|v| v == MANAGER_NAME);

        type_matches && payload_matches && expiry_matches && owned
    }

    /// Replacement for `existing`: our fields win, foreign labels/annotations survive
    pub fn merged_onto(&self, existing: &Secret) -> Secret {
        let mut labels = existing.metadata.labels.clone().unwrap_or_default();
        labels.extend(self.labels.clone());

        let mut annotations = existing.metadata.annotations.clone().unwrap_or_default();
        annotations.extend(self.annotations.clone());

        let mut data = existing.data.clone().unwrap_or_default();
        data.insert(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(self.payload.clone()),
        );

        Secret {
            metadata: ObjectMeta {
                labels: Some(labels),
                annotations: Some(annotations),
                ..existing.metadata.clone()
            },
            type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
            data: Some(data),
            ..existing.clone()
        }
    }
}

/// Transform one validated entry into a secret per target namespace
pub fn transform(entry: &AuthorizationEntry, targets: &SecretTargets) -> Vec<ManagedSecret> {
    let name = targets.name_for(&entry.endpoint);
    targets
        .namespaces
        .iter()
        .map(|namespace| ManagedSecret::from_entry(entry, namespace, &name))
        .collect()
}
