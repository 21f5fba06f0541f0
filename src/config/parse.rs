use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        // Wrap parse errors with file context
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a YAML config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = if yaml_string.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&yaml_string)?
    };

    expand_paths(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap[1].to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.storage.path = expand_tilde(&config.storage.path);

    if let Some(cluster) = config.cluster.as_mut() {
        cluster.token_file = cluster.token_file.as_deref().map(expand_tilde);
        cluster.ca_file = cluster.ca_file.as_deref().map(expand_tilde);
    }

    config.web.static_dir = config.web.static_dir.as_deref().map(expand_tilde);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path must not be empty".to_string());
    }
    if config.storage.max_memory_generation == 0 {
        errors.push("storage.max_memory_generation must be greater than 0".to_string());
    }

    if config.ingest.retry_delay.is_zero() {
        errors.push("ingest.retry_delay must be greater than 0".to_string());
    }

    if let Some(cluster) = &config.cluster {
        validate_cluster(cluster, &mut errors);
    }

    if let Err(e) = config.web.listen.parse::<SocketAddr>() {
        errors.push(format!(
            "web.listen: invalid address '{}': {}",
            config.web.listen, e
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_cluster(cluster: &ClusterConfig, errors: &mut Vec<String>) {
    if !(cluster.api_server.starts_with("http://") || cluster.api_server.starts_with("https://")) {
        errors.push(format!(
            "cluster.api_server: expected an http(s) URL, got '{}'",
            cluster.api_server
        ));
    }
    if cluster.namespace.is_empty() {
        errors.push("cluster.namespace must not be empty".to_string());
    }
    if cluster.poll_interval.is_zero() {
        errors.push("cluster.poll_interval must be greater than 0".to_string());
    }
    if cluster.ignore_prefixes.iter().any(|prefix| prefix.is_empty()) {
        errors.push("cluster.ignore_prefixes: empty prefix would ignore every worker".to_string());
    }
}
