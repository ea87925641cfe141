use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::error::EntryValidationError;

/// One registry's authorization as returned by a [`super::TokenSource`]
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationEntry {
    /// Registry address, used verbatim as the key of the docker config `auths` map
    pub endpoint: String,
    /// Bearer credential presented as the registry password
    pub token: String,
    /// Instant after which the token is rejected by the registry
    pub expires_at: DateTime<Utc>,
}

// Token is secret material, keep it out of logs and panics.
impl fmt::Debug for AuthorizationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEntry")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AuthorizationEntry {
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            expires_at,
        }
    }

    /// Check the entry is usable at `now`
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), EntryValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(EntryValidationError::EmptyEndpoint);
        }
        if self.token.is_empty() {
            return Err(EntryValidationError::EmptyToken {
                endpoint: self.endpoint.clone(),
            });
        }
        if self.expires_at <= now {
            return Err(EntryValidationError::Expired {
                endpoint: self.endpoint.clone(),
                expires_at: self.expires_at.timestamp(),
            });
        }
        Ok(())
    }
}

/// Configuration for AWS ECR
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EcrConfig {
    /// AWS region (e.g., "us-east-1"). Falls back to the default provider chain when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Registry (account) IDs to request tokens for. Empty means the caller's default registry.
    #[serde(default, deserialize_with = "deserialize_registry_ids")]
    pub registry_ids: Vec<String>,
    /// Optional: AWS access key ID (if not using IAM role)
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using IAM role)
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

/// Width of an AWS account ID; numeric values are zero-padded back to it
const ACCOUNT_ID_DIGITS: usize = 12;

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryId {
    Text(String),
    Number(u64),
}

impl From<RegistryId> for String {
    fn from(id: RegistryId) -> Self {
        match id {
            RegistryId::Text(s) => s,
            RegistryId::Number(n) => format!("{:0width$}", n, width = ACCOUNT_ID_DIGITS),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryIds {
    Many(Vec<RegistryId>),
    One(RegistryId),
}

/// Accept a list of IDs or a single ID, as strings or numbers
///
/// A lone `ECR_SYNC_REGISTRY__REGISTRY_IDS=012345678901` reaches us as an
/// integer, so numbers are rendered back as 12-digit account IDs.
fn deserialize_registry_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RegistryIds::deserialize(deserializer)? {
        RegistryIds::Many(ids) => ids.into_iter().map(String::from).collect(),
        RegistryIds::One(id) => vec![String::from(id)],
    })
}
