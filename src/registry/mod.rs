pub mod ecr;
pub mod models;

pub use ecr::EcrTokenSource;
pub use models::{AuthorizationEntry, EcrConfig};

use crate::error::TokenRetrievalError;
use async_trait::async_trait;

/// Source of registry authorization tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch every authorization entry the caller is entitled to
    ///
    /// All-or-nothing: either the full set of entries or an error.
    /// Entry order carries no meaning.
    async fn fetch(&self) -> Result<Vec<AuthorizationEntry>, TokenRetrievalError>;

    /// Short identifier used in logs (e.g., "ecr")
    fn source_type(&self) -> &str;
}
