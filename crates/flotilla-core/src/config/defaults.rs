//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "flotilla.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "flotilla.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".flotilla.toml",
        ".flotilla.yaml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Flotilla Configuration

[cache]
dir = ".flotilla/cache"
enabled = true

[[builds]]
name = "lib"
kind = "library"

[[builds.tasks]]
name = "bundle"
command = "npm run build"
outputs = ["dist/*.js"]

[[builds]]
name = "docs"
kind = "documentation"

[builds.wait]
target = "lib"
timeout_ms = 30000
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate_config;

    #[test]
    fn test_template_parses_and_validates() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.build_names(), vec!["lib", "docs"]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_default_config_toml_roundtrips() {
        let config: Config = toml::from_str(&default_config_toml()).unwrap();
        assert!(config.cache.enabled);
    }
}
