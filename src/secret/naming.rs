/// Placeholder in `name_template` replaced with the registry host
pub const REGISTRY_PLACEHOLDER: &str = "{registry}";

/// Maximum length of a DNS-1123 subdomain (Secret names)
const MAX_NAME_LEN: usize = 253;

/// Where secrets land: one name per registry, repeated in every namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretTargets {
    /// Secret name, must contain [`REGISTRY_PLACEHOLDER`]
    pub name_template: String,
    pub namespaces: Vec<String>,
}

impl SecretTargets {
    pub fn new(name_template: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            name_template: name_template.into(),
            namespaces,
        }
    }

    /// Secret name for a registry endpoint
    ///
    /// # Example
    /// With name_template = "ecr-{registry}" and endpoint
    /// "https://123.dkr.ecr.us-east-1.amazonaws.com":
    /// Returns "ecr-123.dkr.ecr.us-east-1.amazonaws.com"
    pub fn name_for(&self, endpoint: &str) -> String {
        let rendered = self
            .name_template
            .replace(REGISTRY_PLACEHOLDER, &registry_host(endpoint));
        sanitize_object_name(&rendered)
    }
}

/// Registry host without scheme, path or port
pub fn registry_host(endpoint: &str) -> String {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let host = without_scheme.split('/').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    host.to_ascii_lowercase()
}

/// Sanitize a string into a valid Kubernetes object name (DNS-1123 subdomain)
///
/// Lowercases, replaces every character outside `[a-z0-9.-]` with '-',
/// trims non-alphanumeric ends and truncates to 253 characters.
pub fn sanitize_object_name(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|ch| {
            let ch = ch.to_ascii_lowercase();
            if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.' {
                ch
            } else {
                '-'
            }
        })
        .collect();

    let mut result = mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string();

    if result.len() > MAX_NAME_LEN {
        result.truncate(MAX_NAME_LEN);
        result = result
            .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string();
    }

    result
}
