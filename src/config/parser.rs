//! Manifest parser for loading configuration files.
//!
//! This module handles loading the manifest from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, GroundplanError, Result};
use std::path::Path;
use tracing::{debug, info};

use super::spec::Manifest;

/// Parser for loading the deployment manifest.
#[derive(Debug, Default)]
pub struct ManifestParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ManifestParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(GroundplanError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            GroundplanError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses the manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            GroundplanError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed manifest for project: {}",
            manifest.project.name
        );
        Ok(manifest)
    }

    /// Loads the manifest with environment variable overrides.
    ///
    /// Environment variables are checked in the format:
    /// `GROUNDPLAN_<SECTION>_<KEY>` (e.g., `GROUNDPLAN_PROJECT_NAME`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;

        Self::apply_env_overrides(&mut manifest);

        Ok(manifest)
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut Manifest) {
        if let Ok(name) = std::env::var("GROUNDPLAN_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            manifest.project.name = name;
        }

        if let Ok(env) = std::env::var("GROUNDPLAN_PROJECT_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            manifest.project.environment = env;
        }

        if let Ok(endpoint) = std::env::var("GROUNDPLAN_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            manifest.provider.endpoint = endpoint;
        }

        if let Ok(bucket) = std::env::var("GROUNDPLAN_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            manifest.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("GROUNDPLAN_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            manifest.state.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                GroundplanError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider API token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn provider_token() -> Result<String> {
        std::env::var("GROUNDPLAN_PROVIDER_TOKEN").map_err(|_| {
            GroundplanError::Config(ConfigError::MissingEnvVar {
                name: String::from("GROUNDPLAN_PROVIDER_TOKEN"),
            })
        })
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "groundplan.yaml",
    "groundplan.yml",
    "deploy.yaml",
    "deploy.yml",
];

/// Finds the manifest file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest file is found.
pub fn find_manifest_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_MANIFEST_FILES {
            let manifest_path = current.join(filename);
            if manifest_path.exists() {
                info!("Found manifest file: {}", manifest_path.display());
                return Ok(manifest_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(GroundplanError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_MANIFEST_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
project:
  name: test-project
state:
  backend: local
provider:
  endpoint: https://provider.internal/api
resources: []
";
        let parser = ManifestParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.project.name, "test-project");
        assert_eq!(manifest.project.environment, "dev");
        assert_eq!(manifest.apply.max_parallel, 4);
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
project:
  name: bi-platform
  environment: prod

state:
  backend: s3
  bucket: bi-platform-state
  prefix: bi-platform/prod

provider:
  endpoint: https://provider.internal/api
  timeout_secs: 60

apply:
  max_parallel: 8
  max_attempts: 5

resources:
  - id: platform-vpc
    kind: network
    properties:
      cidr: 10.1.0.0/19
      max_azs: 2

  - id: platform-sg
    kind: security-group
    depends_on: [platform-vpc]
    properties:
      ingress:
        - cidr: 10.1.0.0/19
          port: 5432

  - id: hscn-resolver
    kind: dns-resolver
    depends_on: [platform-vpc, platform-sg]
    properties:
      direction: OUTBOUND
"#;
        let parser = ManifestParser::new();
        let result = parser.parse_yaml(yaml, None);
        assert!(result.is_ok());

        let manifest = result.unwrap();
        assert_eq!(manifest.project.name, "bi-platform");
        assert_eq!(manifest.resources.len(), 3);
        assert_eq!(manifest.resources[1].depends_on, vec!["platform-vpc"]);
        assert_eq!(manifest.apply.max_parallel, 8);
        assert_eq!(manifest.provider.timeout_secs, 60);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ManifestParser::new();
        let result = parser.parse_yaml("not: [valid", None);
        assert!(result.is_err());
    }
}
