//! fixturekit Common Library
//!
//! Declarations, registrations and pools: the static side of the fixture
//! engine. A [`PoolBuilder`] collects [`FixtureDecl`]s, validates the
//! dependency graph and publishes an immutable [`Pool`] identified by a
//! content digest.

pub mod config;
pub mod error;
pub mod factory;
pub mod options;
pub mod pool;
pub mod registration;
pub mod types;

// Re-export commonly used types
pub use config::{FixtureInfo, ProjectConfig, RunnerConfig, TestInfo, WorkerInfo};
pub use error::{Error, Result};
pub use factory::{Factory, FactoryFn, FactoryFuture, FixtureValue, Params, ProvideChannel, UseFn};
pub use options::UseOptions;
pub use pool::{Pool, PoolBuilder};
pub use registration::{FixtureDecl, Registration};
pub use types::*;

/// fixturekit version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
