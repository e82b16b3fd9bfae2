//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{BuildConfig, Config};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!(builds = config.builds.len(), "validating configuration");
    validate_builds(config)?;
    for (i, build) in config.builds.iter().enumerate() {
        validate_wait(i, build)?;
        validate_tasks(i, build)?;
    }
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: String, message: impl Into<String>) -> crate::error::FlotillaError {
    ConfigError::InvalidValue {
        field,
        message: message.into(),
    }
    .into()
}

fn validate_builds(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, build) in config.builds.iter().enumerate() {
        if build.name.trim().is_empty() {
            return Err(invalid(
                format!("builds[{}].name", i),
                "build name cannot be empty",
            ));
        }
        if !seen.insert(build.name.as_str()) {
            return Err(invalid(
                format!("builds[{}].name", i),
                format!("duplicate build name '{}'", build.name),
            ));
        }
        if build.build_kind().is_none() {
            return Err(invalid(
                format!("builds[{}].kind", i),
                "must be one of: library, documentation, types, custom",
            ));
        }
    }
    Ok(())
}

fn validate_wait(i: usize, build: &BuildConfig) -> Result<()> {
    let Some(wait) = &build.wait else {
        return Ok(());
    };

    if wait.target.trim().is_empty() {
        return Err(invalid(
            format!("builds[{}].wait.target", i),
            "target cannot be empty",
        ));
    }
    if wait.target == build.name {
        return Err(invalid(
            format!("builds[{}].wait.target", i),
            "a build cannot wait for itself",
        ));
    }
    if wait.timeout_ms == 0 {
        return Err(invalid(
            format!("builds[{}].wait.timeout_ms", i),
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_tasks(i: usize, build: &BuildConfig) -> Result<()> {
    for (j, task) in build.tasks.iter().enumerate() {
        if task.name.trim().is_empty() {
            return Err(invalid(
                format!("builds[{}].tasks[{}].name", i, j),
                "task name cannot be empty",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskConfig, WaitConfig};
    use crate::error::FlotillaError;

    fn config(builds: Vec<BuildConfig>) -> Config {
        Config {
            builds,
            ..Default::default()
        }
    }

    fn wait(target: &str, timeout_ms: u64) -> Option<WaitConfig> {
        Some(WaitConfig {
            target: target.to_string(),
            source: None,
            timeout_ms,
        })
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_duplicate_build_names() {
        let config = config(vec![BuildConfig::new("lib"), BuildConfig::new("lib")]);
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(
            err,
            FlotillaError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "builds[1].name"
        ));
    }

    #[test]
    fn test_validate_unknown_kind() {
        let mut build = BuildConfig::new("lib");
        build.kind = "bundle".to_string();
        assert!(validate_config(&config(vec![build])).is_err());
    }

    #[test]
    fn test_validate_wait() {
        let mut build = BuildConfig::new("docs");
        build.wait = wait("docs", 100);
        assert!(validate_config(&config(vec![build.clone()])).is_err());

        build.wait = wait("lib", 0);
        assert!(validate_config(&config(vec![build.clone()])).is_err());

        // Waiting on a build that is not configured is allowed; the wait is skipped at runtime
        build.wait = wait("lib", 100);
        assert!(validate_config(&config(vec![build])).is_ok());
    }

    #[test]
    fn test_validate_empty_task_name() {
        let mut build = BuildConfig::new("lib");
        build.tasks.push(TaskConfig::new(""));
        assert!(validate_config(&config(vec![build])).is_err());
    }
}
