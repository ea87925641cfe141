pub mod report;

pub use report::{Failure, ItemReport, SyncReport};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::reconciler::{SecretReconciler, SecretStore};
use crate::registry::TokenSource;
use crate::secret::{self, ManagedSecret, SecretTargets};

/// Per-pass mutual exclusion keyed by (namespace, name)
#[derive(Default)]
struct TargetLocks {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl TargetLocks {
    async fn acquire(&self, namespace: &str, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

/// One token fetch, transform and reconcile pass
pub struct SyncPipeline {
    source: Arc<dyn TokenSource>,
    reconciler: SecretReconciler,
    targets: SecretTargets,
    concurrency: usize,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn TokenSource>,
        store: Arc<dyn SecretStore>,
        targets: SecretTargets,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            reconciler: SecretReconciler::new(store),
            targets,
            concurrency: concurrency.max(1),
        }
    }

    /// Run a single synchronization pass
    ///
    /// Token retrieval failure aborts the pass. Invalid entries and failed
    /// secrets are collected in the returned report without stopping the
    /// others. If `cancel` fires, no further writes are issued and
    /// [`SyncError::Cancelled`] is returned with whatever finished.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        info!(
            source = self.source.source_type(),
            namespaces = ?self.targets.namespaces,
            "Starting synchronization pass"
        );

        let entries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled { report: None }),
            result = self.source.fetch() => result?,
        };
        info!(count = entries.len(), "Fetched registry authorization entries");

        let now = Utc::now();
        let mut report = SyncReport::default();
        let mut secrets: Vec<ManagedSecret> = Vec::new();
        for entry in &entries {
            match entry.validate(now) {
                Ok(()) => secrets.extend(secret::transform(entry, &self.targets)),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid authorization entry");
                    report.rejected.push(e);
                }
            }
        }

        let locks = TargetLocks::default();
        let locks = &locks;
        let reconciler = &self.reconciler;
        let mut items: Vec<ItemReport> = stream::iter(secrets)
            .map(|desired| async move {
                let _guard = locks.acquire(&desired.namespace, &desired.name).await;
                let result = reconciler.apply(&desired, cancel).await;
                if let Err(e) = &result {
                    warn!(
                        namespace = desired.namespace,
                        name = desired.name,
                        error = %e,
                        "Failed to reconcile pull secret"
                    );
                }
                ItemReport::new(&desired, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        items.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        report.items = items;

        if cancel.is_cancelled() {
            warn!(summary = %report, "Synchronization pass cancelled");
            return Err(SyncError::Cancelled {
                report: Some(report),
            });
        }

        info!(summary = %report, "Synchronization pass finished");
        Ok(report)
    }
}
