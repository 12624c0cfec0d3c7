//! Manifest validation.
//!
//! This module checks the manifest for structural problems before a graph is
//! built: invalid names, duplicate identifiers, self-dependencies, and
//! backend-specific requirements. Unknown references and cycles are the
//! graph's job and are reported there.

use crate::error::{ConfigError, GroundplanError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{Manifest, ResourceSpec, StateBackend};

/// Validator for deployment manifests.
#[derive(Debug, Default)]
pub struct ManifestValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ManifestValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&manifest.project, &mut result);
        Self::validate_state(&manifest.state, &mut result);
        Self::validate_provider(&manifest.provider, &mut result);
        Self::validate_apply(&manifest.apply, &mut result);
        Self::validate_resources(&manifest.resources, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(GroundplanError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(project: &super::spec::ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &super::spec::StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.is_none() || state.bucket.as_ref().is_some_and(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                // Local backend is always valid
            }
        }
    }

    /// Validates provider configuration.
    fn validate_provider(provider: &super::spec::ProviderConfig, result: &mut ValidationResult) {
        if provider.endpoint.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("provider.endpoint"),
                message: String::from("Provider endpoint cannot be empty"),
            });
        } else if !provider.endpoint.starts_with("http://")
            && !provider.endpoint.starts_with("https://")
        {
            result.errors.push(ValidationError {
                field: String::from("provider.endpoint"),
                message: format!(
                    "Provider endpoint '{}' must be an http(s) URL",
                    provider.endpoint
                ),
            });
        }

        if provider.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("provider.timeout_secs"),
                message: String::from("Provider timeout must be at least 1 second"),
            });
        }
    }

    /// Validates apply tuning.
    fn validate_apply(apply: &super::spec::ApplyConfig, result: &mut ValidationResult) {
        if apply.max_parallel == 0 {
            result.errors.push(ValidationError {
                field: String::from("apply.max_parallel"),
                message: String::from("max_parallel must be at least 1"),
            });
        }

        if apply.max_attempts == 0 {
            result.errors.push(ValidationError {
                field: String::from("apply.max_attempts"),
                message: String::from("max_attempts must be at least 1"),
            });
        }

        if apply.max_parallel > 64 {
            result.warnings.push(format!(
                "apply.max_parallel: {} concurrent provider calls is unusual",
                apply.max_parallel
            ));
        }
    }

    /// Validates all resource specs.
    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in manifest"));
            return;
        }

        let mut seen_ids = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if seen_ids.contains(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate resource id: {}", resource.id),
                });
            } else {
                seen_ids.insert(&resource.id);
            }

            if !is_valid_name(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!(
                        "Resource id '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.id
                    ),
                });
            }

            if resource.kind.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.kind"),
                    message: String::from("Resource kind cannot be empty"),
                });
            }

            let mut seen_deps = HashSet::new();
            for (j, dep) in resource.depends_on.iter().enumerate() {
                if dep == &resource.id {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.depends_on[{j}]"),
                        message: format!("Resource '{}' cannot depend on itself", resource.id),
                    });
                }

                if !seen_deps.insert(dep) {
                    result.warnings.push(format!(
                        "{prefix}.depends_on[{j}]: duplicate dependency '{dep}'"
                    ));
                }
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next() {
        if !first.is_ascii_lowercase() {
            return false;
        }
    }

    // Rest must be lowercase alphanumeric or hyphen
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    // Cannot end with hyphen
    if name.ends_with('-') {
        return false;
    }

    // Cannot have consecutive hyphens
    if name.contains("--") {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
