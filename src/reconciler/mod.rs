pub mod kube_store;
#[cfg(test)]
pub(crate) mod testing;

pub use kube_store::KubeSecretStore;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{is_api_status, ReconcileError};
use crate::secret::{ManagedSecret, DOCKER_CONFIG_JSON_TYPE, LABEL_MANAGED_BY, MANAGER_NAME};

/// Upper bound on get/write rounds for one secret when the API keeps answering 409
pub const MAX_RECONCILE_ATTEMPTS: u32 = 3;

/// Secret operations the reconciler needs from the cluster
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns `Ok(None)` when the secret does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error>;

    /// Replace carrying the observed resourceVersion; stale versions fail with 409
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error>;
}

/// What a successful reconcile did to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
        };
        write!(f, "{}", s)
    }
}

/// Applies managed secrets with create-if-absent, update-if-changed, no-op-if-identical
pub struct SecretReconciler {
    store: Arc<dyn SecretStore>,
}

impl SecretReconciler {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Reconcile one secret
    ///
    /// Reads before every write. A create rejected with AlreadyExists and a
    /// replace rejected for a stale resourceVersion both re-read and retry,
    /// up to [`MAX_RECONCILE_ATTEMPTS`] rounds. No write is issued once
    /// `cancel` has fired.
    pub async fn apply(
        &self,
        desired: &ManagedSecret,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let namespace = desired.namespace.as_str();
        let name = desired.name.as_str();

        for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
            let existing = self
                .store
                .get(namespace, name)
                .await
                .map_err(|source| write_error("get", desired, source))?;

            match existing {
                Some(existing) if desired.matches(&existing) => {
                    debug!(
                        namespace = namespace,
                        name = name,
                        expires_at = desired.expires_at().unwrap_or_default(),
                        "Pull secret is up to date, skipping"
                    );
                    return Ok(ReconcileOutcome::Unchanged);
                }
                Some(existing) => {
                    if let Some(found) = foreign_type(&existing) {
                        return Err(ReconcileError::TypeMismatch {
                            namespace: namespace.to_string(),
                            name: name.to_string(),
                            found: found.to_string(),
                        });
                    }
                    ensure_not_cancelled(cancel, desired)?;

                    if !is_managed(&existing) {
                        warn!(
                            namespace = namespace,
                            name = name,
                            "Taking over pull secret that lacks the {} label",
                            LABEL_MANAGED_BY
                        );
                    }

                    let replacement = desired.merged_onto(&existing);
                    match self.store.replace(namespace, name, &replacement).await {
                        Ok(_) => {
                            info!(
                                namespace = namespace,
                                name = name,
                                expires_at = desired.expires_at().unwrap_or_default(),
                                "Pull secret updated"
                            );
                            return Ok(ReconcileOutcome::Updated);
                        }
                        Err(e) if is_api_status(&e, 409) => {
                            debug!(
                                namespace = namespace,
                                name = name,
                                attempt = attempt,
                                "Pull secret changed underneath us, re-reading"
                            );
                        }
                        Err(source) => return Err(write_error("replace", desired, source)),
                    }
                }
                None => {
                    ensure_not_cancelled(cancel, desired)?;

                    match self.store.create(namespace, &desired.to_secret()).await {
                        Ok(_) => {
                            info!(
                                namespace = namespace,
                                name = name,
                                expires_at = desired.expires_at().unwrap_or_default(),
                                "Pull secret created"
                            );
                            return Ok(ReconcileOutcome::Created);
                        }
                        Err(e) if is_api_status(&e, 409) => {
                            debug!(
                                namespace = namespace,
                                name = name,
                                attempt = attempt,
                                "Pull secret already exists, falling through to update"
                            );
                        }
                        Err(source) => return Err(write_error("create", desired, source)),
                    }
                }
            }
        }

        Err(ReconcileError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
            attempts: MAX_RECONCILE_ATTEMPTS,
        })
    }
}

fn is_managed(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_MANAGED_BY))
        .is_some_and(|v| v == MANAGER_NAME)
}

/// Type of `secret` when it is set and not dockerconfigjson
fn foreign_type(secret: &Secret) -> Option<&str> {
    secret
        .type_
        .as_deref()
        .filter(|t| *t != DOCKER_CONFIG_JSON_TYPE)
}

fn ensure_not_cancelled(
    cancel: &CancellationToken,
    desired: &ManagedSecret,
) -> Result<(), ReconcileError> {
    if cancel.is_cancelled() {
        return Err(ReconcileError::Cancelled {
            namespace: desired.namespace.clone(),
            name: desired.name.clone(),
        });
    }
    Ok(())
}

fn write_error(
    operation: &'static str,
    desired: &ManagedSecret,
    source: kube::Error,
) -> ReconcileError {
    ReconcileError::Write {
        operation,
        namespace: desired.namespace.clone(),
        name: desired.name.clone(),
        source,
    }
}
