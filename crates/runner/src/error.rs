//! Error types for the fixture runner

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FixtureError {
    #[error("No fixture pool is active")]
    NoPool,

    #[error("Did not teardown test scope")]
    TestScopeNotTornDown,

    #[error(
        "Detected inconsistent fixture options (active pool {active}, requested pool {requested}).\n\
         Most common mistakes that lead to this issue:\n  \
         - Declaring options outside of the test file, for example in a common helper.\n  \
         - One test file imports from another test file."
    )]
    InconsistentOptions { active: String, requested: String },

    #[error("{location}: fixture \"{name}\" is not declared")]
    UnknownFixture { name: String, location: String },

    #[error("{0}")]
    InvalidParameters(String),

    #[error("Fixture \"{fixture}\" failed during setup: {cause}")]
    Setup {
        fixture: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Fixture \"{0}\" finished without providing a value")]
    NotProvided(String),

    #[error("Fixture \"{fixture}\" failed during teardown: {cause}")]
    Teardown {
        fixture: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("Fixture \"{fixture}\" panicked: {message}")]
    Panicked { fixture: String, message: String },

    #[error("\"{title}\" failed: {cause}")]
    Function {
        title: String,
        cause: Arc<anyhow::Error>,
    },
}

pub type FixtureResult<T> = Result<T, FixtureError>;
