//! Layered configuration loading: environment variables (`DISPATCH__`
//! prefix, `__` nesting) over an optional file named by `SETTINGS_MODULE`
//! over built-in defaults, deserialized with `serde` through the `config`
//! crate the way `lgn-worker`'s `Config::load` does it.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::DispatchError;

const ENV_PREFIX: &str = "DISPATCH";
const SETTINGS_MODULE_VAR: &str = "SETTINGS_MODULE";

fn default_connect_timeout() -> f64 {
    2.0
}

fn default_poll_time() -> f64 {
    20.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqsSettings {
    pub endpoint: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "default_poll_time")]
    pub poll_time: f64,
    pub visibility_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsSettings {
    pub sqs: SqsSettings,
}

/// Top-level configuration, mirroring the original's `aws.sqs.*` /
/// `tasks` / `routes` / `dbs` / `synchronous` keys.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub aws: AwsSettings,
    pub tasks: Vec<String>,
    pub routes: HashMap<String, String>,
    pub dbs: Vec<String>,
    #[serde(default)]
    pub synchronous: bool,
}

impl DispatchConfig {
    /// Loads configuration with the documented precedence: environment
    /// variables win, then the file named by `SETTINGS_MODULE` (if set),
    /// then built-in defaults. Fails fast with
    /// [`DispatchError::Configuration`] when a required field is absent.
    pub fn load() -> Result<Self, DispatchError> {
        let settings_module = std::env::var(SETTINGS_MODULE_VAR).ok();
        Self::load_from(settings_module.as_deref())
    }

    pub fn load_from(settings_module: Option<&str>) -> Result<Self, DispatchError> {
        let defaults = config::Config::try_from(&serde_json::json!({
            "aws": {"sqs": {"connect_timeout": 2.0, "poll_time": 20.0}},
            "synchronous": false,
        }))
        .map_err(|e| DispatchError::Configuration(format!("invalid built-in defaults: {e}")))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = settings_module {
            builder = builder.add_source(config::File::from(Path::new(path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| DispatchError::Configuration(format!("failed to load configuration: {e}")))?;

        let config: DispatchConfig = built
            .try_deserialize()
            .map_err(|e| DispatchError::Configuration(format!("failed to deserialize configuration: {e}")))?;

        validate(&config)?;
        Ok(config)
    }
}

/// Required fields: `aws.sqs.endpoint`, `tasks`, `routes` (non-empty),
/// `dbs` (present, may be empty).
fn validate(config: &DispatchConfig) -> Result<(), DispatchError> {
    let mut missing = Vec::new();
    if config.aws.sqs.endpoint.trim().is_empty() {
        missing.push("aws.sqs.endpoint");
    }
    if config.routes.is_empty() {
        missing.push("routes");
    }
    if !missing.is_empty() {
        return Err(DispatchError::Configuration(format!(
            "required field(s) missing: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_from_file_with_required_fields() {
        let file = write_temp_yaml(
            r#"
aws:
  sqs:
    endpoint: "http://localhost:4566"
tasks:
  - "ns.tasks"
routes:
  ns: "ns-queue"
dbs: []
"#,
        );
        let config = DispatchConfig::load_from(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.aws.sqs.endpoint, "http://localhost:4566");
        assert_eq!(config.aws.sqs.connect_timeout, 2.0);
        assert_eq!(config.aws.sqs.poll_time, 20.0);
        assert!(!config.synchronous);
    }

    #[test]
    fn missing_endpoint_fails_configuration() {
        let file = write_temp_yaml(
            r#"
aws:
  sqs:
    endpoint: ""
tasks: []
routes:
  ns: "ns-queue"
dbs: []
"#,
        );
        let err = DispatchConfig::load_from(Some(file.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[test]
    fn empty_routes_fails_configuration() {
        let file = write_temp_yaml(
            r#"
aws:
  sqs:
    endpoint: "http://localhost:4566"
tasks: []
routes: {}
dbs: []
"#,
        );
        let err = DispatchConfig::load_from(Some(file.path().to_str().unwrap())).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let file = write_temp_yaml(
            r#"
aws:
  sqs:
    endpoint: "http://localhost:4566"
    poll_time: 20.0
tasks: []
routes:
  ns: "ns-queue"
dbs: []
"#,
        );
        std::env::set_var("DISPATCH__AWS__SQS__POLL_TIME", "5.0");
        let config = DispatchConfig::load_from(Some(file.path().to_str().unwrap())).unwrap();
        std::env::remove_var("DISPATCH__AWS__SQS__POLL_TIME");
        assert_eq!(config.aws.sqs.poll_time, 5.0);
    }
}
