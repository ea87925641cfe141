//! In-memory [`SecretStore`] for unit tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use super::SecretStore;
use crate::error::api_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Replace,
}

struct Fault {
    code: u16,
    reason: String,
    /// Object that "appears" in the store as the fault fires
    then_insert: Option<Secret>,
}

#[derive(Default)]
pub struct MemorySecretStore {
    objects: Mutex<BTreeMap<(String, String), Secret>>,
    calls: Mutex<Vec<(StoreOp, String, String)>>,
    faults: Mutex<HashMap<(StoreOp, String), VecDeque<Fault>>>,
    next_version: Mutex<u64>,
}

impl MemorySecretStore {
    /// Seed an object as if an earlier pass or another actor had written it
    pub fn insert(&self, mut secret: Secret) {
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let name = secret.metadata.name.clone().unwrap_or_default();
        secret.metadata.resource_version = Some(self.bump_version());
        self.objects
            .lock()
            .unwrap()
            .insert((namespace, name), secret);
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Make the next `op` against secret `name` fail with an API status
    pub fn fail_next(&self, op: StoreOp, name: &str, code: u16, reason: &str) {
        self.push_fault(
            op,
            name,
            Fault {
                code,
                reason: reason.to_string(),
                then_insert: None,
            },
        );
    }

    /// Next create of `name` loses a race: `winner` is stored and 409 AlreadyExists returned
    pub fn race_create(&self, namespace: &str, name: &str, mut winner: Secret) {
        winner.metadata.namespace = Some(namespace.to_string());
        winner.metadata.name = Some(name.to_string());
        self.push_fault(
            StoreOp::Create,
            name,
            Fault {
                code: 409,
                reason: "AlreadyExists".to_string(),
                then_insert: Some(winner),
            },
        );
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _, _)| *o == op)
            .count()
    }

    /// Number of create and replace calls
    pub fn mutations(&self) -> usize {
        self.count(StoreOp::Create) + self.count(StoreOp::Replace)
    }

    fn push_fault(&self, op: StoreOp, name: &str, fault: Fault) {
        self.faults
            .lock()
            .unwrap()
            .entry((op, name.to_string()))
            .or_default()
            .push_back(fault);
    }

    fn bump_version(&self) -> String {
        let mut v = self.next_version.lock().unwrap();
        *v += 1;
        v.to_string()
    }

    fn record(&self, op: StoreOp, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.calls
            .lock()
            .unwrap()
            .push((op, namespace.to_string(), name.to_string()));

        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&(op, name.to_string()))
            .and_then(VecDeque::pop_front);

        match fault {
            Some(fault) => {
                if let Some(winner) = fault.then_insert {
                    self.insert(winner);
                }
                Err(api_error(fault.code, &fault.reason))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        self.record(StoreOp::Get, namespace, name)?;
        Ok(self.object(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.record(StoreOp::Create, namespace, &name)?;

        let key = (namespace.to_string(), name);
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(self.bump_version());
        self.objects.lock().unwrap().insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        self.record(StoreOp::Replace, namespace, name)?;

        let key = (namespace.to_string(), name.to_string());
        let current_version = match self.objects.lock().unwrap().get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(api_error(404, "NotFound")),
        };
        if secret.metadata.resource_version.is_some()
            && secret.metadata.resource_version != current_version
        {
            return Err(api_error(409, "Conflict"));
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        self.objects.lock().unwrap().insert(key, stored.clone());
        Ok(stored)
    }
}
