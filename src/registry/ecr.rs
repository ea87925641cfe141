use async_trait::async_trait;
use aws_sdk_ecr::operation::get_authorization_token::builders::GetAuthorizationTokenFluentBuilder;
use aws_sdk_ecr::Client as EcrClient;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::TokenRetrievalError;
use crate::registry::{models::AuthorizationEntry, TokenSource};

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    match debug_str.char_indices().nth(MAX_SDK_ERROR_CHARS) {
        Some((cut, _)) => format!("{}...", &debug_str[..cut]),
        None => debug_str,
    }
}

const MAX_SDK_ERROR_CHARS: usize = 200;

/// Decode an ECR authorization token into the registry password
///
/// ECR hands out `base64("AWS:<password>")`; the pull secret wants the password.
pub fn decode_authorization_token(token: &str) -> Result<String, String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|e| format!("token is not valid base64: {}", e))?;

    let decoded_str =
        String::from_utf8(decoded).map_err(|_| "token is not valid UTF-8".to_string())?;

    match decoded_str.split_once(':') {
        Some((_, password)) => Ok(password.to_string()),
        None => Err("token is not in user:password form".to_string()),
    }
}

// ECR flags registryIds as legacy on this call but still honors it.
#[allow(deprecated)]
fn scope_to_registries(
    request: GetAuthorizationTokenFluentBuilder,
    registry_ids: &[String],
) -> GetAuthorizationTokenFluentBuilder {
    if registry_ids.is_empty() {
        request
    } else {
        request.set_registry_ids(Some(registry_ids.to_vec()))
    }
}

/// AWS ECR token source
pub struct EcrTokenSource {
    client: EcrClient,
    registry_ids: Vec<String>,
}

impl EcrTokenSource {
    /// Wrap an already-authenticated ECR client
    ///
    /// An empty `registry_ids` asks ECR for the caller's default registry.
    pub fn new(client: EcrClient, registry_ids: Vec<String>) -> Self {
        Self {
            client,
            registry_ids,
        }
    }
}

#[async_trait]
impl TokenSource for EcrTokenSource {
    async fn fetch(&self) -> Result<Vec<AuthorizationEntry>, TokenRetrievalError> {
        tracing::info!(
            registry_ids = ?self.registry_ids,
            "Requesting ECR authorization tokens"
        );

        let request =
            scope_to_registries(self.client.get_authorization_token(), &self.registry_ids);
        let response = request
            .send()
            .await
            .map_err(|e| TokenRetrievalError::Request(format_sdk_error(&e)))?;

        let mut entries = Vec::with_capacity(response.authorization_data().len());
        for auth_data in response.authorization_data() {
            // Missing endpoint/token are left empty and rejected per entry later.
            let endpoint = auth_data.proxy_endpoint().unwrap_or_default().to_string();

            let expires_at = auth_data
                .expires_at()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0))
                .ok_or_else(|| TokenRetrievalError::Malformed {
                    endpoint: endpoint.clone(),
                    reason: "missing or out-of-range expiresAt".to_string(),
                })?;

            let token = match auth_data.authorization_token() {
                Some(raw) if !raw.is_empty() => decode_authorization_token(raw).map_err(
                    |reason| TokenRetrievalError::Malformed {
                        endpoint: endpoint.clone(),
                        reason,
                    },
                )?,
                _ => String::new(),
            };

            tracing::debug!(
                endpoint = %endpoint,
                expires_at = %expires_at,
                "Received ECR authorization data"
            );
            entries.push(AuthorizationEntry {
                endpoint,
                token,
                expires_at,
            });
        }

        Ok(entries)
    }

    fn source_type(&self) -> &str {
        "ecr"
    }
}
