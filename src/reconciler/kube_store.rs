use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::Client;

use super::SecretStore;

/// [`SecretStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    kube_client: Client,
}

impl KubeSecretStore {
    pub fn new(kube_client: Client) -> Self {
        Self { kube_client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.kube_client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        match self.api(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, kube::Error> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, kube::Error> {
        self.api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
    }
}
