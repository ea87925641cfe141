use std::collections::BTreeSet;
use std::fmt;

use crate::error::{EntryValidationError, ReconcileError};
use crate::reconciler::ReconcileOutcome;
use crate::secret::ManagedSecret;

/// Result of reconciling one secret
#[derive(Debug)]
pub struct ItemReport {
    pub namespace: String,
    pub name: String,
    pub endpoint: String,
    pub result: Result<ReconcileOutcome, ReconcileError>,
}

impl ItemReport {
    pub fn new(secret: &ManagedSecret, result: Result<ReconcileOutcome, ReconcileError>) -> Self {
        Self {
            namespace: secret.namespace.clone(),
            name: secret.name.clone(),
            endpoint: secret.endpoint.clone(),
            result,
        }
    }

    /// "namespace/name"
    pub fn target(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One thing that went wrong in a pass, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// "namespace/name", or None for entries rejected before reaching a target
    pub target: Option<String>,
    pub endpoint: Option<String>,
    pub reason: String,
}

/// Aggregated outcome of a synchronization pass
#[derive(Debug, Default)]
pub struct SyncReport {
    pub items: Vec<ItemReport>,
    /// Authorization entries dropped by validation
    pub rejected: Vec<EntryValidationError>,
}

impl SyncReport {
    pub fn count(&self, outcome: ReconcileOutcome) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(&i.result, Ok(o) if *o == outcome))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_err()).count() + self.rejected.len()
    }

    /// True only if every entry was valid and every secret reconciled
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> Vec<Failure> {
        let rejected = self.rejected.iter().map(|e| Failure {
            target: None,
            endpoint: e.endpoint().map(str::to_string),
            reason: e.to_string(),
        });

        let failed_items = self.items.iter().filter_map(|item| {
            item.result.as_ref().err().map(|e| Failure {
                target: Some(item.target()),
                endpoint: Some(item.endpoint.clone()),
                reason: e.to_string(),
            })
        });

        rejected.chain(failed_items).collect()
    }

    /// Registry endpoints with at least one failed secret, the subset worth retrying
    pub fn failed_endpoints(&self) -> BTreeSet<String> {
        self.failures()
            .into_iter()
            .filter_map(|f| f.endpoint)
            .collect()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded ({} created, {} updated, {} unchanged), {} failed",
            self.succeeded(),
            self.count(ReconcileOutcome::Created),
            self.count(ReconcileOutcome::Updated),
            self.count(ReconcileOutcome::Unchanged),
            self.failed()
        )
    }
}
