use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecr_k8s_secret_manager::error::{ClientSetupError, SyncError};
use ecr_k8s_secret_manager::reconciler::KubeSecretStore;
use ecr_k8s_secret_manager::registry::EcrTokenSource;
use ecr_k8s_secret_manager::settings::{Settings, CONFIG_DIR_ENV};
use ecr_k8s_secret_manager::sync::{SyncPipeline, SyncReport};
use ecr_k8s_secret_manager::{clients, summary};

/// Every secret reconciled
const EXIT_SUCCESS: u8 = 0;
/// The pass ran but something failed: token retrieval, an entry, a secret, or cancellation
const EXIT_SYNC_FAILURE: u8 = 1;
/// Configuration or client construction failed, nothing was attempted
const EXIT_SETUP_FAILURE: u8 = 2;

/// Sync AWS ECR authorization tokens into Kubernetes image pull secrets (one pass)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory containing default/local config files (default: $ECR_SYNC_CONFIG_DIR or "config")
    #[arg(long)]
    config_dir: Option<String>,
    /// Target namespace, repeatable. Replaces secret.namespaces from config
    #[arg(long = "namespace")]
    namespaces: Vec<String>,
    /// Deadline for the pass in seconds, 0 disables it. Replaces sync.timeout_secs
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Load settings and build the pipeline with real clients
async fn setup(cli: &Cli) -> Result<(SyncPipeline, Settings)> {
    let config_dir = cli
        .config_dir
        .clone()
        .or_else(|| std::env::var(CONFIG_DIR_ENV).ok())
        .unwrap_or_else(|| "config".into());

    let mut settings = Settings::load_from(&config_dir)
        .map_err(ClientSetupError::from)
        .context("Failed to load settings")?;
    if !cli.namespaces.is_empty() {
        settings.secret.namespaces = cli.namespaces.clone();
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.sync.timeout_secs = timeout_secs;
    }
    settings
        .validate()
        .map_err(ClientSetupError::from)
        .context("Invalid settings")?;

    let kube_client = clients::kube_client(&settings.kubernetes)
        .await
        .context("Failed to create Kubernetes client")?;
    let ecr_client = clients::ecr_client(&settings.registry).await;

    let pipeline = SyncPipeline::new(
        Arc::new(EcrTokenSource::new(
            ecr_client,
            settings.registry.registry_ids.clone(),
        )),
        Arc::new(KubeSecretStore::new(kube_client)),
        settings.secret.targets(),
        settings.sync.concurrency,
    );

    Ok((pipeline, settings))
}

/// Cancel the pass on Ctrl+C, SIGTERM or when the deadline passes
async fn cancel_on_shutdown(cancel: CancellationToken, deadline: Option<Duration>) {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let timeout = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), cancelling synchronization pass");
        },
        _ = terminate => {
            info!("Received SIGTERM, cancelling synchronization pass");
        },
        _ = timeout => {
            warn!("Synchronization deadline reached, cancelling pass");
        },
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (pipeline, settings) = match setup(&cli).await {
        Ok(ready) => ready,
        Err(e) => {
            error!("Could not start: {:#}", e);
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    let cancel = CancellationToken::new();
    let deadline = match settings.sync.timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let watcher = tokio::spawn(cancel_on_shutdown(cancel.clone(), deadline));

    let result = pipeline.run(&cancel).await;

    // Stop the watcher so the runtime can shut down
    cancel.cancel();
    watcher.await.ok();

    match &result {
        Ok(report) => {
            println!("{}", summary::report_table(report));
            println!("{}", report);
            if !report.is_success() {
                warn!(
                    endpoints = ?report.failed_endpoints(),
                    "Registries with failures, retry on the next pass"
                );
                for failure in report.failures() {
                    error!(
                        target_secret = failure.target.as_deref().unwrap_or("-"),
                        endpoint = failure.endpoint.as_deref().unwrap_or("-"),
                        "{}",
                        failure.reason
                    );
                }
            }
        }
        Err(SyncError::TokenRetrieval(e)) => {
            error!("Failed to retrieve registry authorization: {}", e);
        }
        Err(SyncError::Cancelled { report }) => {
            if let Some(report) = report {
                println!("{}", summary::report_table(report));
                println!("{}", report);
            }
            error!("Synchronization pass cancelled before completion");
        }
    }

    ExitCode::from(exit_code(&result))
}

/// Exit status for a pass that got past setup
fn exit_code(result: &Result<SyncReport, SyncError>) -> u8 {
    match result {
        Ok(report) if report.is_success() => EXIT_SUCCESS,
        Ok(_) | Err(SyncError::TokenRetrieval(_)) | Err(SyncError::Cancelled { .. }) => {
            EXIT_SYNC_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecr_k8s_secret_manager::error::{
        EntryValidationError, ReconcileError, TokenRetrievalError,
    };
    use ecr_k8s_secret_manager::reconciler::ReconcileOutcome;
    use ecr_k8s_secret_manager::sync::ItemReport;

    fn item(result: Result<ReconcileOutcome, ReconcileError>) -> ItemReport {
        ItemReport {
            namespace: "default".to_string(),
            name: "ecr-registry-secret-123".to_string(),
            endpoint: "https://123.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            result,
        }
    }

    #[test]
    fn test_clean_pass_exits_zero() {
        let report = SyncReport {
            items: vec![
                item(Ok(ReconcileOutcome::Created)),
                item(Ok(ReconcileOutcome::Unchanged)),
            ],
            rejected: vec![],
        };
        assert_eq!(exit_code(&Ok(report)), EXIT_SUCCESS);
    }

    #[test]
    fn test_failed_item_exits_one() {
        let report = SyncReport {
            items: vec![
                item(Ok(ReconcileOutcome::Updated)),
                item(Err(ReconcileError::Conflict {
                    namespace: "default".to_string(),
                    name: "ecr-registry-secret-123".to_string(),
                    attempts: 3,
                })),
            ],
            rejected: vec![],
        };
        assert_eq!(exit_code(&Ok(report)), EXIT_SYNC_FAILURE);
    }

    #[test]
    fn test_rejected_entry_exits_one() {
        let report = SyncReport {
            items: vec![item(Ok(ReconcileOutcome::Created))],
            rejected: vec![EntryValidationError::EmptyEndpoint],
        };
        assert_eq!(exit_code(&Ok(report)), EXIT_SYNC_FAILURE);
    }

    #[test]
    fn test_token_retrieval_failure_exits_one() {
        let result = Err(SyncError::TokenRetrieval(TokenRetrievalError::Request(
            "AccessDeniedException".to_string(),
        )));
        assert_eq!(exit_code(&result), EXIT_SYNC_FAILURE);
    }

    #[test]
    fn test_cancelled_pass_exits_one() {
        assert_eq!(
            exit_code(&Err(SyncError::Cancelled { report: None })),
            EXIT_SYNC_FAILURE
        );
        let partial = SyncReport {
            items: vec![item(Ok(ReconcileOutcome::Created))],
            rejected: vec![],
        };
        assert_eq!(
            exit_code(&Err(SyncError::Cancelled {
                report: Some(partial)
            })),
            EXIT_SYNC_FAILURE
        );
    }

    #[test]
    fn test_exit_statuses_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_SYNC_FAILURE);
        assert_ne!(EXIT_SYNC_FAILURE, EXIT_SETUP_FAILURE);
        assert_ne!(EXIT_SUCCESS, EXIT_SETUP_FAILURE);
    }
}
