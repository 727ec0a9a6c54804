//! Configuration file loader for image-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::build_id::{parse_time_zone, validate_channel};
use crate::core::error::PublishError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tracing::{debug, warn};

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".image-publisher.yaml";

/// Variables consulted for the revision hash, in order
pub const REVISION_ENV_VARS: &[&str] = &["PUBLISH_REVISION", "GITHUB_SHA"];

/// Maximum depth of `extends` chains
const MAX_EXTENDS_DEPTH: usize = 8;

lazy_static! {
    /// Environment variable pattern (${VAR_NAME})
    static ref ENV_VAR_PATTERN: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Configuration load options
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Explicit config file; must exist when set
    pub config_path: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli_args: Option<PublisherConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "destinations[0].namespace")
    pub field: String,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. Project config (./.image-publisher.yaml, or `config_path`)
    /// 4. Base configs named by `extends`
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PublisherConfig, PublishError> {
        let mut configs: Vec<PublisherConfig> = vec![PublisherConfig::default()];

        let file_config = match &options.config_path {
            Some(path) => {
                let config = Self::load_config_file(path, 0).await?;
                if config.is_none() {
                    return Err(PublishError::ConfigError(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                config
            }
            None => Self::load_config_file(&options.project_path.join(CONFIG_FILENAME), 0).await?,
        };

        if let Some(config) = file_config {
            configs.push(config);
        }

        if let Some(env_config) = Self::load_env_config(&options.env)? {
            configs.push(env_config);
        }

        // Only configuration files carry a schema version
        if let Some(mut cli_config) = options.cli_args {
            cli_config.version.clear();
            configs.push(cli_config);
        }

        let merged = Self::merge_configs(configs);

        Ok(Self::expand_env_vars(merged, &options.env))
    }

    /// Load configuration from a YAML file, following `extends`
    fn load_config_file(
        file_path: &Path,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PublisherConfig>, PublishError>> + Send + '_>> {
        Box::pin(async move {
            if fs::metadata(file_path).await.is_err() {
                return Ok(None);
            }

            if depth > MAX_EXTENDS_DEPTH {
                return Err(PublishError::ConfigError(format!(
                    "extends chain deeper than {} at {}",
                    MAX_EXTENDS_DEPTH,
                    file_path.display()
                )));
            }

            debug!(path = %file_path.display(), "Loading config file");

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublishError::ConfigError(format!("Failed to read config file: {}", e))
            })?;

            let config: PublisherConfig = serde_yaml::from_str(&content).map_err(|e| {
                PublishError::ConfigError(format!("Failed to parse YAML config: {}", e))
            })?;

            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| PublishError::ConfigError("Invalid config file path".to_string()))?
                    .join(extends_path);

                match Self::load_config_file(&base_path, depth + 1).await? {
                    Some(base_config) => {
                        return Ok(Some(Self::merge_configs(vec![base_config, config])));
                    }
                    None => {
                        return Err(PublishError::ConfigError(format!(
                            "extended config not found: {}",
                            base_path.display()
                        )));
                    }
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from environment variables
    fn load_env_config(env: &HashMap<String, String>) -> Result<Option<PublisherConfig>, PublishError> {
        let mut config = PublisherConfig::overlay();
        let mut has_changes = false;

        // PUBLISH_CHANNEL -> channels (comma separated)
        if let Some(channels) = env.get("PUBLISH_CHANNEL") {
            let channels: Vec<String> = channels
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if !channels.is_empty() {
                config.channels = Some(channels);
                has_changes = true;
            }
        }

        // PUBLISH_TIME_ZONE -> timeZone
        if let Some(zone) = env.get("PUBLISH_TIME_ZONE") {
            config.time_zone = Some(zone.clone());
            has_changes = true;
        }

        // PUBLISH_ENGINE -> engine
        if let Some(engine) = env.get("PUBLISH_ENGINE") {
            let engine = engine.parse::<Engine>().map_err(PublishError::ConfigError)?;
            config.engine = Some(engine);
            has_changes = true;
        }

        // PUBLISH_SEQUENTIAL -> publish.sequential
        if env.get("PUBLISH_SEQUENTIAL").map(|s| s.as_str()) == Some("true") {
            config.publish = Some(PublishSettings {
                sequential: Some(true),
                ..Default::default()
            });
            has_changes = true;
        }

        Ok(if has_changes { Some(config) } else { None })
    }

    /// Merge multiple configurations with priority
    fn merge_configs(configs: Vec<PublisherConfig>) -> PublisherConfig {
        let mut result = PublisherConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target
    fn merge_into(target: &mut PublisherConfig, source: PublisherConfig) {
        if !source.version.is_empty() {
            target.version = source.version;
        }
        if source.extends.is_some() {
            target.extends = source.extends;
        }
        if source.channels.is_some() {
            target.channels = source.channels;
        }
        if source.time_zone.is_some() {
            target.time_zone = source.time_zone;
        }
        if source.schedule.is_some() {
            target.schedule = source.schedule;
        }
        if source.engine.is_some() {
            target.engine = source.engine;
        }
        if source.artifact.is_some() {
            target.artifact = source.artifact;
        }

        // Publish settings merge field by field
        if let Some(source_publish) = source.publish {
            let target_publish = target.publish.get_or_insert_with(PublishSettings::default);
            if source_publish.sequential.is_some() {
                target_publish.sequential = source_publish.sequential;
            }
            if source_publish.max_concurrency.is_some() {
                target_publish.max_concurrency = source_publish.max_concurrency;
            }
            if source_publish.command_timeout_secs.is_some() {
                target_publish.command_timeout_secs = source_publish.command_timeout_secs;
            }
        }

        // Destination lists replace each other wholesale
        if source.destinations.is_some() {
            target.destinations = source.destinations;
        }
    }

    /// Expand `${VAR}` references in destination hosts and namespaces and
    /// in the artifact image
    ///
    /// Credential variable names are left untouched; their values are only
    /// read at authentication time.
    fn expand_env_vars(mut config: PublisherConfig, env: &HashMap<String, String>) -> PublisherConfig {
        if let Some(destinations) = &mut config.destinations {
            for destination in destinations.iter_mut() {
                destination.host = Self::expand_string(&destination.host, env);
                destination.namespace = Self::expand_string(&destination.namespace, env);
            }
        }

        if let Some(artifact) = &mut config.artifact {
            artifact.image = Self::expand_string(&artifact.image, env);
        }

        config
    }

    /// Expand environment variables in a single string
    ///
    /// Unknown variables are left in place so validation can report them.
    fn expand_string(input: &str, env: &HashMap<String, String>) -> String {
        ENV_VAR_PATTERN
            .replace_all(input, |caps: &regex::Captures| match env.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    warn!(variable = %&caps[1], "Environment variable not found");
                    caps[0].to_string()
                }
            })
            .into_owned()
    }

    /// Resolve the revision hash from an explicit value or the environment
    pub fn resolve_revision(
        explicit: Option<String>,
        env: &HashMap<String, String>,
    ) -> Result<String, PublishError> {
        explicit
            .filter(|r| !r.trim().is_empty())
            .or_else(|| {
                REVISION_ENV_VARS
                    .iter()
                    .filter_map(|name| env.get(*name))
                    .find(|value| !value.trim().is_empty())
                    .cloned()
            })
            .ok_or_else(|| PublishError::InvalidRevision {
                revision: String::new(),
                reason: format!(
                    "no revision given (use --revision or set {})",
                    REVISION_ENV_VARS.join(" / ")
                ),
            })
    }

    /// Validate configuration
    pub fn validate(config: &PublisherConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Version
        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "Version is required".to_string(),
                expected: Some("string (e.g., \"1.0\")".to_string()),
                actual: Some("empty".to_string()),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("Unknown version: {}", config.version),
                suggestion: Some("Currently supported version is \"1.0\" only".to_string()),
            });
        }

        // 2. Tag inputs
        for (index, channel) in config.channels().iter().enumerate() {
            if let Err(e) = validate_channel(channel) {
                errors.push(ConfigValidationError {
                    field: format!("channels[{}]", index),
                    message: e.to_string(),
                    expected: Some("[A-Za-z0-9_][A-Za-z0-9_.-]*".to_string()),
                    actual: Some(channel.clone()),
                });
            }
        }

        if let Err(e) = parse_time_zone(config.time_zone()) {
            errors.push(ConfigValidationError {
                field: "timeZone".to_string(),
                message: e.to_string(),
                expected: Some("IANA zone name (e.g., Asia/Shanghai)".to_string()),
                actual: Some(config.time_zone().to_string()),
            });
        }

        if let Some(schedule) = &config.schedule {
            if schedule.split_whitespace().count() != 5 {
                warnings.push(ConfigValidationWarning {
                    field: "schedule".to_string(),
                    message: format!("'{}' is not a five-field cron expression", schedule),
                    suggestion: Some("e.g. \"10 12 * * *\" (evaluated in UTC)".to_string()),
                });
            }
        }

        // 3. Artifact
        match &config.artifact {
            None => errors.push(ConfigValidationError {
                field: "artifact.image".to_string(),
                message: "artifact image is required".to_string(),
                expected: Some("local image reference".to_string()),
                actual: None,
            }),
            Some(artifact) if artifact.image.trim().is_empty() || artifact.image.contains("${") => {
                errors.push(ConfigValidationError {
                    field: "artifact.image".to_string(),
                    message: "artifact image is empty or has unresolved variables".to_string(),
                    expected: Some("local image reference".to_string()),
                    actual: Some(artifact.image.clone()),
                })
            }
            Some(_) => {}
        }

        // 4. Destinations
        Self::validate_destinations(config, &mut errors, &mut warnings);

        // 5. Publish settings
        if config.max_concurrency() == 0 {
            errors.push(ConfigValidationError {
                field: "publish.maxConcurrency".to_string(),
                message: "maxConcurrency must be at least 1".to_string(),
                expected: Some(">= 1".to_string()),
                actual: Some("0".to_string()),
            });
        }
        if config.max_concurrency() > MAX_CONCURRENCY {
            errors.push(ConfigValidationError {
                field: "publish.maxConcurrency".to_string(),
                message: format!("maxConcurrency must not exceed {}", MAX_CONCURRENCY),
                expected: Some(format!("1..={}", MAX_CONCURRENCY)),
                actual: Some(config.max_concurrency().to_string()),
            });
        }
        if config.command_timeout_secs() == 0 {
            errors.push(ConfigValidationError {
                field: "publish.commandTimeoutSecs".to_string(),
                message: "commandTimeoutSecs must be at least 1".to_string(),
                expected: Some(">= 1".to_string()),
                actual: Some("0".to_string()),
            });
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn validate_destinations(
        config: &PublisherConfig,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        let destinations = config.destinations();

        if destinations.is_empty() {
            errors.push(ConfigValidationError {
                field: "destinations".to_string(),
                message: "at least one destination is required".to_string(),
                expected: Some("non-empty array".to_string()),
                actual: Some("empty".to_string()),
            });
            return;
        }

        if destinations.len() == 1 {
            warnings.push(ConfigValidationWarning {
                field: "destinations".to_string(),
                message: "only one destination configured".to_string(),
                suggestion: Some("Add a mirror registry to keep builds available".to_string()),
            });
        }

        let mut seen = HashSet::new();
        for (index, destination) in destinations.iter().enumerate() {
            if let Err(e) = destination.validate() {
                errors.push(ConfigValidationError {
                    field: format!("destinations[{}]", index),
                    message: e.to_string(),
                    expected: None,
                    actual: Some(destination.repository()),
                });
            }

            if !seen.insert(destination.name.as_str()) {
                errors.push(ConfigValidationError {
                    field: format!("destinations[{}].name", index),
                    message: format!("duplicate destination name '{}'", destination.name),
                    expected: Some("unique name".to_string()),
                    actual: Some(destination.name.clone()),
                });
            }
        }
    }

    /// Format validation result for display
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration is valid".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
                if let (Some(expected), Some(actual)) = (&error.expected, &error.actual) {
                    lines.push(format!("    Expected: {}", expected));
                    lines.push(format!("    Actual: {}", actual));
                }
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
