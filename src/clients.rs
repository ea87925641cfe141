//! Construction of the authenticated Kubernetes and ECR clients.

use aws_config::BehaviorVersion;
use aws_sdk_ecr::Client as EcrClient;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::info;

use crate::error::ClientSetupError;
use crate::registry::EcrConfig;
use crate::settings::KubernetesSettings;

/// Set by the kubelet in every pod
pub const IN_CLUSTER_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Create a kube client, in-cluster when running in a pod, otherwise from kubeconfig
pub async fn kube_client(settings: &KubernetesSettings) -> Result<kube::Client, ClientSetupError> {
    // Install default CryptoProvider for rustls (required for kube-rs HTTPS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let kube_config = if std::env::var_os(IN_CLUSTER_ENV).is_some() {
        info!("Running inside Kubernetes, using in-cluster config");
        kube::Config::incluster().map_err(|e| ClientSetupError::KubeConfig(e.to_string()))?
    } else {
        let kubeconfig = match &settings.kubeconfig {
            Some(path) => {
                info!(path = path, "Running outside Kubernetes, using kubeconfig");
                Kubeconfig::read_from(path)
            }
            None => {
                info!("Running outside Kubernetes, using default kubeconfig");
                Kubeconfig::read()
            }
        }
        .map_err(|e| ClientSetupError::KubeConfig(e.to_string()))?;

        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientSetupError::KubeConfig(e.to_string()))?
    };

    let kube_client = kube::Client::try_from(kube_config)?;
    info!("Created Kubernetes client");
    Ok(kube_client)
}

/// Create an ECR client from static credentials or the default AWS credential chain
pub async fn ecr_client(config: &EcrConfig) -> EcrClient {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = &config.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }

    if let (Some(access_key), Some(secret_key)) =
        (&config.access_key_id, &config.secret_access_key)
    {
        // Use static credentials if provided
        let creds =
            aws_sdk_ecr::config::Credentials::new(access_key, secret_key, None, None, "static");
        loader = loader.credentials_provider(creds);
    }

    // Otherwise the default chain applies (IRSA, instance role, env vars, profile)
    let aws_config = loader.load().await;
    EcrClient::new(&aws_config)
}
