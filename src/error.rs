use thiserror::Error;

/// Failure to construct one of the external clients or load configuration.
///
/// Raised before any synchronization work starts; the binary exits with a
/// status distinct from a failed pass.
#[derive(Debug, Error)]
pub enum ClientSetupError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to build Kubernetes client config: {0}")]
    KubeConfig(String),
    #[error("Failed to create Kubernetes client: {0}")]
    KubeClient(#[from] kube::Error),
}

/// The registry token call failed as a whole. No entries are produced.
#[derive(Debug, Error)]
pub enum TokenRetrievalError {
    #[error("ECR GetAuthorizationToken failed: {0}")]
    Request(String),
    #[error("Malformed authorization data for {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
}

/// An authorization entry that cannot be turned into a secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryValidationError {
    #[error("authorization entry has an empty registry endpoint")]
    EmptyEndpoint,
    #[error("authorization entry for {endpoint} has an empty token")]
    EmptyToken { endpoint: String },
    #[error("authorization entry for {endpoint} expired at {expires_at}")]
    Expired { endpoint: String, expires_at: i64 },
}

impl EntryValidationError {
    /// Registry endpoint the rejected entry belonged to, if it had one
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            EntryValidationError::EmptyEndpoint => None,
            EntryValidationError::EmptyToken { endpoint }
            | EntryValidationError::Expired { endpoint, .. } => Some(endpoint),
        }
    }
}

/// Per-secret reconcile failure. Never aborts sibling items.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Optimistic-concurrency conflicts persisted across every retry
    #[error("conflict on {namespace}/{name} persisted after {attempts} attempts")]
    Conflict {
        namespace: String,
        name: String,
        attempts: u32,
    },
    #[error("{operation} of {namespace}/{name} failed: {source}")]
    Write {
        operation: &'static str,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    /// A same-named secret of another type exists; `type` is immutable so it cannot be replaced
    #[error("{namespace}/{name} exists with type {found}, refusing to replace it")]
    TypeMismatch {
        namespace: String,
        name: String,
        found: String,
    },
    #[error("pass cancelled before {namespace}/{name} was written")]
    Cancelled { namespace: String, name: String },
}

/// Errors that end a synchronization pass as a whole.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    TokenRetrieval(#[from] TokenRetrievalError),
    /// Cancellation or deadline fired mid-pass. Carries whatever completed.
    #[error("synchronization pass cancelled")]
    Cancelled {
        report: Option<crate::sync::SyncReport>,
    },
}

/// Returns true if the kube error is an API response with the given status code
pub fn is_api_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == code)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("test {}", reason),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_api_status() {
        assert!(is_api_status(&api_error(409, "AlreadyExists"), 409));
        assert!(!is_api_status(&api_error(403, "Forbidden"), 409));
    }

    #[test]
    fn test_validation_error_endpoint() {
        assert_eq!(EntryValidationError::EmptyEndpoint.endpoint(), None);
        let err = EntryValidationError::EmptyToken {
            endpoint: "https://1.dkr.ecr.eu-west-1.amazonaws.com".to_string(),
        };
        assert_eq!(
            err.endpoint(),
            Some("https://1.dkr.ecr.eu-west-1.amazonaws.com")
        );
    }

    #[test]
    fn test_write_error_message_names_target() {
        let err = ReconcileError::Write {
            operation: "create",
            namespace: "default".to_string(),
            name: "ecr-registry".to_string(),
            source: api_error(403, "Forbidden"),
        };
        let message = err.to_string();
        assert!(message.contains("create of default/ecr-registry failed"));
    }
}
