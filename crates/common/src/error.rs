//! Error types for fixture declarations and pools

use thiserror::Error;

use crate::types::Location;

/// Result type alias using fixturekit Error
pub type Result<T> = std::result::Result<T, Error>;

/// Declaration, pool and configuration errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{location}: fixture \"{fixture}\" has unknown parameter \"{parameter}\"")]
    UnknownDependency {
        fixture: String,
        parameter: String,
        location: Location,
    },

    #[error("{location}: worker fixture \"{fixture}\" cannot depend on test fixture \"{dependency}\"")]
    ScopeViolation {
        fixture: String,
        dependency: String,
        location: Location,
    },

    #[error("{location}: fixture \"{fixture}\" has already been registered as a {{ scope: '{existing}' }} fixture")]
    ScopeOverride {
        fixture: String,
        existing: String,
        location: Location,
    },

    #[error("Fixtures are forming a dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Fixture \"{0}\" is declared without a factory or value")]
    MissingFactory(String),

    #[error("Cannot provide value for fixture \"{0}\" for the second time")]
    DoubleProvide(String),

    #[error("Missing parameter \"{0}\"")]
    MissingParameter(String),

    #[error("Parameter \"{name}\" is not a {expected}")]
    ParameterType { name: String, expected: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
