use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;

use crate::registry::EcrConfig;
use crate::secret::{naming::REGISTRY_PLACEHOLDER, SecretTargets};

/// Prefix for environment overrides, e.g. `ECR_SYNC_SECRET__NAMESPACES=default,apps`
const ENV_PREFIX: &str = "ECR_SYNC";

/// Overrides the directory settings files are read from
pub const CONFIG_DIR_ENV: &str = "ECR_SYNC_CONFIG_DIR";

/// Key [`CONFIG_DIR_ENV`] maps to once the prefix is stripped
const CONFIG_DIR_KEY: &str = "config_dir";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub registry: EcrConfig,
    #[serde(default)]
    pub secret: SecretSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_name_template() -> String {
    "ecr-registry-secret-{registry}".to_string()
}

fn default_namespaces() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretSettings {
    /// Secret name; `{registry}` is replaced with the registry host (default: "ecr-registry-secret-{registry}")
    #[serde(default = "default_name_template")]
    pub name_template: String,

    /// Namespaces that receive a copy of every registry's pull secret (default: ["default"])
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            name_template: default_name_template(),
            namespaces: default_namespaces(),
        }
    }
}

impl SecretSettings {
    pub fn targets(&self) -> SecretTargets {
        SecretTargets::new(self.name_template.clone(), self.namespaces.clone())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KubernetesSettings {
    /// Explicit kubeconfig path used outside the cluster (default: ~/.kube/config resolution)
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    /// Maximum secrets reconciled at once (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Deadline for the whole pass in seconds, 0 disables it (default: 300)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        let re = match regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}") {
            Ok(re) => re,
            Err(_) => return s.to_string(),
        };

        re.replace_all(s, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match env::var(var_name) {
                Ok(val) => val,
                Err(_) => default_value.unwrap_or("").to_string(),
            }
        })
        .to_string()
    }

    /// Convert a config::Value to JSON, substituting environment variables in strings
    ///
    /// 128-bit integers outside the 64-bit range are rejected rather than truncated.
    fn config_value_to_json(value: &config::Value) -> Result<serde_json::Value, ConfigError> {
        use config::ValueKind;
        use serde_json::Value;

        let out_of_range =
            |n: String| ConfigError::Message(format!("Integer {} is out of range", n));

        Ok(match &value.kind {
            ValueKind::Nil => Value::Null,
            ValueKind::Boolean(b) => Value::Bool(*b),
            ValueKind::I64(i) => Value::from(*i),
            ValueKind::I128(i) => {
                Value::from(i64::try_from(*i).map_err(|_| out_of_range(i.to_string()))?)
            }
            ValueKind::U64(u) => Value::from(*u),
            ValueKind::U128(u) => {
                Value::from(u64::try_from(*u).map_err(|_| out_of_range(u.to_string()))?)
            }
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueKind::String(s) => Value::String(Self::substitute_env_vars_in_string(s)),
            ValueKind::Table(table) => Value::Object(
                table
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::config_value_to_json(v)?)))
                    .collect::<Result<_, ConfigError>>()?,
            ),
            ValueKind::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Self::config_value_to_json)
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Add `{config_dir}/{name}.{toml,yaml,yml}` if present
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> bool {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return true;
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        false
    }

    /// Load settings from `config_dir` and `ECR_SYNC_*` environment variables
    ///
    /// Every file is optional; with none present the built-in defaults apply,
    /// so the binary runs without arguments or configuration.
    pub fn load_from(config_dir: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(config_dir, None)
    }

    /// Like [`Settings::load_from`], reading overrides from `vars` instead of the
    /// process environment when given
    fn load_with_env(
        config_dir: &str,
        vars: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults shipped with the deployment
        Self::try_add_config_file(&mut builder, config_dir, "default");

        // 2. Local overrides (not checked into git)
        Self::try_add_config_file(&mut builder, config_dir, "local");

        // 3. Environment, e.g. ECR_SYNC_REGISTRY__REGION=eu-west-1
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("secret.namespaces")
                .with_list_parse_key("registry.registry_ids")
                .try_parsing(true)
                .source(vars),
        );

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let json_value = Self::config_value_to_json(&config::Value::from(root_value))?;

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        // ECR_SYNC_CONFIG_DIR shares the prefix but is consumed before loading
        for field in unused_fields.iter().filter(|f| *f != CONFIG_DIR_KEY) {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_format_string(
            &self.secret.name_template,
            "secret.name_template",
            REGISTRY_PLACEHOLDER,
        )?;

        if self.secret.namespaces.is_empty() {
            return Err(ConfigError::Message(
                "secret.namespaces must list at least one namespace".to_string(),
            ));
        }
        if let Some(blank) = self.secret.namespaces.iter().find(|n| n.trim().is_empty()) {
            return Err(ConfigError::Message(format!(
                "secret.namespaces contains an empty namespace: {:?}",
                blank
            )));
        }

        if self.sync.concurrency == 0 {
            return Err(ConfigError::Message(
                "sync.concurrency must be at least 1".to_string(),
            ));
        }

        if self.registry.access_key_id.is_some() != self.registry.secret_access_key.is_some() {
            return Err(ConfigError::Message(
                "registry.access_key_id and registry.secret_access_key must be set together"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Validate that a format string contains the required placeholder
    fn validate_format_string(
        format_str: &str,
        field_name: &str,
        required_placeholder: &str,
    ) -> Result<(), ConfigError> {
        if !format_str.contains(required_placeholder) {
            return Err(ConfigError::Message(format!(
                "{} must contain the {} placeholder, got: {}",
                field_name, required_placeholder, format_str
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("ECR_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${ECR_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("ECR_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("ECR_MISSING_VAR");
        let result = Settings::substitute_env_vars_in_string("${ECR_MISSING_VAR:-eu-west-1}");
        assert_eq!(result, "eu-west-1");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_defaults_without_config_files() {
        let temp_dir = TempDir::new().unwrap();
        let settings =
            Settings::load_with_env(temp_dir.path().to_str().unwrap(), env(&[])).unwrap();

        assert_eq!(settings.secret.name_template, "ecr-registry-secret-{registry}");
        assert_eq!(settings.secret.namespaces, vec!["default".to_string()]);
        assert_eq!(settings.sync.concurrency, 4);
        assert_eq!(settings.sync.timeout_secs, 300);
        assert!(settings.registry.registry_ids.is_empty());
    }

    #[test]
    fn test_load_yaml_with_unknown_field() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.yaml"),
            r#"
registry:
  region: "${ECR_TEST_REGION:-us-east-1}"
  registry_ids: ["123456789012"]
  unknown_field: "should trigger warning"
secret:
  name_template: "pull-{registry}"
  namespaces: ["default", "apps"]
sync:
  concurrency: 2
"#,
        )
        .unwrap();

        let settings =
            Settings::load_with_env(temp_dir.path().to_str().unwrap(), env(&[])).unwrap();
        assert_eq!(settings.registry.region.as_deref(), Some("us-east-1"));
        assert_eq!(settings.registry.registry_ids, vec!["123456789012"]);
        assert_eq!(settings.secret.namespaces, vec!["default", "apps"]);
        assert_eq!(settings.sync.concurrency, 2);
    }

    #[test]
    fn test_local_overrides_default() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            "[secret]\nname_template = \"a-{registry}\"\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("local.toml"),
            "[secret]\nname_template = \"b-{registry}\"\n",
        )
        .unwrap();

        let settings =
            Settings::load_with_env(temp_dir.path().to_str().unwrap(), env(&[])).unwrap();
        assert_eq!(settings.secret.name_template, "b-{registry}");
    }

    fn env(vars: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_env_overrides_use_single_underscore_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_with_env(
            temp_dir.path().to_str().unwrap(),
            env(&[
                ("ECR_SYNC_SECRET__NAMESPACES", "default,apps"),
                ("ECR_SYNC_REGISTRY__REGION", "eu-west-1"),
                ("ECR_SYNC_SYNC__CONCURRENCY", "8"),
                ("ECR_SYNC_CONFIG_DIR", "/etc/ecr-sync"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.secret.namespaces, vec!["default", "apps"]);
        assert_eq!(settings.registry.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.sync.concurrency, 8);
    }

    #[test]
    fn test_env_single_registry_id() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_with_env(
            temp_dir.path().to_str().unwrap(),
            env(&[("ECR_SYNC_REGISTRY__REGISTRY_IDS", "123456789012")]),
        )
        .unwrap();
        assert_eq!(settings.registry.registry_ids, vec!["123456789012"]);

        let settings = Settings::load_with_env(
            temp_dir.path().to_str().unwrap(),
            env(&[("ECR_SYNC_REGISTRY__REGISTRY_IDS", "123456789012,012345678901")]),
        )
        .unwrap();
        assert_eq!(
            settings.registry.registry_ids,
            vec!["123456789012", "012345678901"]
        );
    }

    #[test]
    fn test_oversized_integer_is_rejected() {
        let value = config::Value::new(None, config::ValueKind::U128(u128::MAX));
        assert!(Settings::config_value_to_json(&value).is_err());

        let value = config::Value::new(None, config::ValueKind::I128(-5));
        assert_eq!(
            Settings::config_value_to_json(&value).unwrap(),
            serde_json::json!(-5)
        );
    }

    #[test]
    fn test_name_template_requires_placeholder() {
        let mut settings = Settings::default();
        settings.secret.name_template = "ecr-registry-secret".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("{registry}"));
    }

    #[test]
    fn test_rejects_empty_namespace_list_and_zero_concurrency() {
        let mut settings = Settings::default();
        settings.secret.namespaces.clear();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sync.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_static_credentials_must_be_paired() {
        let mut settings = Settings::default();
        settings.registry.access_key_id = Some("AKIA".to_string());
        assert!(settings.validate().is_err());
    }
}
