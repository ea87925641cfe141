//! Keeps Kubernetes image pull secrets in sync with short-lived AWS ECR tokens.
//!
//! A pass fetches registry authorization entries ([`registry`]), turns each
//! into a `kubernetes.io/dockerconfigjson` Secret ([`secret`]), and upserts it
//! ([`reconciler`]). [`sync::SyncPipeline`] runs the three steps and
//! aggregates per-secret results.

pub mod clients;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod secret;
pub mod settings;
pub mod summary;
pub mod sync;
