use std::time::Duration;

use fanout_core::error::CoreError;
use fanout_core::registry::{InstanceRegistry, TlsMode};
use fanout_core::types::{parse_instance_list, InstanceId, StatementRequest};
use fanout_db::PgConnectorConfig;
use fanout_pipeline::coordinator::DEFAULT_MAX_CONCURRENCY;

use crate::output::OutputFormat;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Errors raised while reading the worker configuration.
///
/// All of them are input errors: the run is aborted before any instance is
/// contacted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("Failed to read instance registry file {path}: {source}")]
    RegistryFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Input(err.to_string())
    }
}

/// Log line format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT`. Unknown values fall back to text since this runs
    /// before logging is available to report them.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Everything one worker run needs, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub request: StatementRequest,
    pub instances: Vec<InstanceId>,
    pub registry: InstanceRegistry,
    pub connector: PgConnectorConfig,
    pub max_concurrency: usize,
    pub output: OutputFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                  | Default   |
    /// |--------------------------|-----------|
    /// | `SQL_QUERY`              | required  |
    /// | `SQL_PARAMS`             | `[]`      |
    /// | `TARGET_INSTANCES`       | `[]`      |
    /// | `INSTANCE_REGISTRY`      | --        |
    /// | `INSTANCE_REGISTRY_FILE` | --        |
    /// | `DEFAULT_TLS_MODE`       | `require` |
    /// | `CONNECT_TIMEOUT_SECS`   | `30`      |
    /// | `STATEMENT_TIMEOUT_SECS` | unset     |
    /// | `MAX_CONCURRENCY`        | `1`       |
    /// | `OUTPUT_FORMAT`          | `table`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a
    /// variable or `None` if it is unset. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sql = get("SQL_QUERY").ok_or(ConfigError::Missing("SQL_QUERY"))?;
        let request = StatementRequest::from_json(sql, get("SQL_PARAMS").as_deref())
            .map_err(invalid("SQL_PARAMS"))?;

        let instances = match get("TARGET_INSTANCES") {
            Some(raw) => parse_instance_list(&raw).map_err(invalid("TARGET_INSTANCES"))?,
            None => Vec::new(),
        };

        let registry = match (get("INSTANCE_REGISTRY"), get("INSTANCE_REGISTRY_FILE")) {
            (Some(raw), _) => {
                InstanceRegistry::from_json(&raw).map_err(invalid("INSTANCE_REGISTRY"))?
            }
            (None, Some(path)) => load_registry_file(&path)?,
            (None, None) => {
                tracing::warn!(
                    "Neither INSTANCE_REGISTRY nor INSTANCE_REGISTRY_FILE is set; \
                     every instance will be reported as not configured"
                );
                InstanceRegistry::default()
            }
        };

        let default_tls = match get("DEFAULT_TLS_MODE") {
            Some(raw) => raw.parse::<TlsMode>().map_err(invalid("DEFAULT_TLS_MODE"))?,
            None => TlsMode::default(),
        };

        let connect_timeout_secs = match get("CONNECT_TIMEOUT_SECS") {
            Some(raw) => parse_positive::<u64>("CONNECT_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };

        let statement_timeout = get("STATEMENT_TIMEOUT_SECS")
            .map(|raw| parse_positive::<u64>("STATEMENT_TIMEOUT_SECS", &raw))
            .transpose()?
            .map(Duration::from_secs);

        let max_concurrency = match get("MAX_CONCURRENCY") {
            Some(raw) => parse_positive::<usize>("MAX_CONCURRENCY", &raw)?,
            None => DEFAULT_MAX_CONCURRENCY,
        };

        let output = match get("OUTPUT_FORMAT") {
            Some(raw) => raw.parse::<OutputFormat>().map_err(|message| ConfigError::Invalid {
                var: "OUTPUT_FORMAT",
                message,
            })?,
            None => OutputFormat::default(),
        };

        Ok(Self {
            request,
            instances,
            registry,
            connector: PgConnectorConfig {
                default_tls,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                statement_timeout,
            },
            max_concurrency,
            output,
        })
    }
}

/// Read and parse a registry JSON file.
pub fn load_registry_file(path: &str) -> Result<InstanceRegistry, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RegistryFile {
        path: path.to_string(),
        source,
    })?;
    InstanceRegistry::from_json(&raw).map_err(invalid("INSTANCE_REGISTRY_FILE"))
}

fn invalid(var: &'static str) -> impl Fn(CoreError) -> ConfigError {
    move |err| ConfigError::Invalid {
        var,
        message: match err {
            CoreError::Input(message) => message,
            other => other.to_string(),
        },
    }
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::Invalid {
            var,
            message: format!("expected a positive integer, got '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use fanout_core::types::SqlParam;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = load(&[("SQL_QUERY", "DELETE FROM t")]).unwrap();

        assert_eq!(config.request.sql(), "DELETE FROM t");
        assert!(config.request.params().is_empty());
        assert!(config.instances.is_empty());
        assert!(config.registry.is_empty());
        assert_eq!(config.connector.default_tls, TlsMode::Require);
        assert_eq!(config.connector.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.connector.statement_timeout, None);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.output, OutputFormat::Table);
    }

    #[test]
    fn full_config_is_parsed() {
        let config = load(&[
            ("SQL_QUERY", "UPDATE t SET x=1 WHERE id=$1"),
            ("SQL_PARAMS", "[42]"),
            ("TARGET_INSTANCES", r#"["A", "B", "C"]"#),
            ("INSTANCE_REGISTRY", r#"{"A": "postgres://a/app", "B": "postgres://b/app"}"#),
            ("DEFAULT_TLS_MODE", "verify-full"),
            ("CONNECT_TIMEOUT_SECS", "5"),
            ("STATEMENT_TIMEOUT_SECS", "60"),
            ("MAX_CONCURRENCY", "4"),
            ("OUTPUT_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.request.params(), [SqlParam::Int(42)]);
        assert_eq!(config.instances.len(), 3);
        assert_eq!(config.registry.len(), 2);
        assert_eq!(config.connector.default_tls, TlsMode::VerifyFull);
        assert_eq!(config.connector.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.connector.statement_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn missing_query_is_rejected() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("SQL_QUERY")));
        assert_matches!(load(&[("SQL_QUERY", "  ")]), Err(ConfigError::Missing("SQL_QUERY")));
    }

    #[test]
    fn malformed_params_are_rejected() {
        let result = load(&[("SQL_QUERY", "SELECT 1"), ("SQL_PARAMS", "not json")]);
        assert_matches!(result, Err(ConfigError::Invalid { var: "SQL_PARAMS", .. }));
    }

    #[test]
    fn malformed_instance_list_is_rejected() {
        let result = load(&[("SQL_QUERY", "SELECT 1"), ("TARGET_INSTANCES", r#""A""#)]);
        assert_matches!(result, Err(ConfigError::Invalid { var: "TARGET_INSTANCES", .. }));
    }

    #[test]
    fn malformed_registry_is_rejected() {
        let result = load(&[("SQL_QUERY", "SELECT 1"), ("INSTANCE_REGISTRY", "[]")]);
        assert_matches!(result, Err(ConfigError::Invalid { var: "INSTANCE_REGISTRY", .. }));
    }

    #[test]
    fn zero_concurrency_and_timeouts_are_rejected() {
        for var in ["MAX_CONCURRENCY", "CONNECT_TIMEOUT_SECS", "STATEMENT_TIMEOUT_SECS"] {
            let result = load(&[("SQL_QUERY", "SELECT 1"), (var, "0")]);
            assert_matches!(result, Err(ConfigError::Invalid { var: v, .. }) if v == var);
        }
        let result = load(&[("SQL_QUERY", "SELECT 1"), ("MAX_CONCURRENCY", "many")]);
        assert_matches!(result, Err(ConfigError::Invalid { var: "MAX_CONCURRENCY", .. }));
    }

    #[test]
    fn unknown_output_format_is_rejected() {
        let result = load(&[("SQL_QUERY", "SELECT 1"), ("OUTPUT_FORMAT", "yaml")]);
        assert_matches!(result, Err(ConfigError::Invalid { var: "OUTPUT_FORMAT", .. }));
    }

    #[test]
    fn registry_is_loaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{"A": {"url": "postgres://a/app", "tls": "disable"}}"#,
        )
        .unwrap();

        let config = load(&[
            ("SQL_QUERY", "SELECT 1"),
            ("INSTANCE_REGISTRY_FILE", path.to_str().unwrap()),
        ])
        .unwrap();

        let target = config.registry.resolve(&"A".into()).unwrap();
        assert_eq!(target.tls(), Some(TlsMode::Disable));
    }

    #[test]
    fn inline_registry_takes_precedence_over_file() {
        let config = load(&[
            ("SQL_QUERY", "SELECT 1"),
            ("INSTANCE_REGISTRY", r#"{"A": "postgres://a/app"}"#),
            ("INSTANCE_REGISTRY_FILE", "/nonexistent/registry.json"),
        ])
        .unwrap();
        assert_eq!(config.registry.len(), 1);
    }

    #[test]
    fn missing_registry_file_is_an_error() {
        let result = load(&[
            ("SQL_QUERY", "SELECT 1"),
            ("INSTANCE_REGISTRY_FILE", "/nonexistent/registry.json"),
        ]);
        assert_matches!(result, Err(ConfigError::RegistryFile { .. }));
    }

    #[test]
    fn config_errors_become_input_errors() {
        let err: CoreError = ConfigError::Missing("SQL_QUERY").into();
        assert_eq!(err, CoreError::Input("SQL_QUERY must be set".into()));
    }
}
