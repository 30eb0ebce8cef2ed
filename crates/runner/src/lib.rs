//! fixturekit Runner
//!
//! The fixture lifecycle engine. A [`FixtureRunner`] resolves the fixtures a
//! test or hook asks for, sets them up in dependency order, caches one
//! instance per registration and tears them down per scope, always tearing
//! down a fixture's consumers before the fixture itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  FixtureRunner                                               │
//! │    ├── set_pool(Pool)                                        │
//! │    ├── resolve_parameters_for_function(fn, ctx, auto)        │
//! │    │     └── setup_fixture_for_registration(reg, ctx)        │
//! │    │           └── Fixture::setup ── deps first, then factory│
//! │    ├── teardown_scope(scope, timeouts)                       │
//! │    │     └── Fixture::teardown ── usages first, then resume  │
//! │    └── depends_on_worker_fixtures_only(fn)                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  TestContext                                                 │
//! │    ├── TimeoutManager  (current fixture for diagnostics)     │
//! │    ├── StepTracker     ("fixture: <name>" steps)             │
//! │    └── TestInfo / WorkerInfo                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod error;
pub mod fixture;
pub mod function;
pub mod runner;
pub mod steps;
pub mod telemetry;
pub mod timeout;
pub mod usage;

pub use context::{
    FixturePhase, RunnableDescription, StepCategory, StepId, StepSpec, StepTracker, TestContext,
    TimeSlot, TimeoutManager,
};
pub use error::{FixtureError, FixtureResult};
pub use fixture::{Fixture, FixtureState};
pub use function::{fixture_parameter_names, TestFunction};
pub use runner::{FixtureRunner, Invocation};
pub use steps::{StepLog, StepRecord};
pub use timeout::FixtureTimeouts;
pub use usage::UsageIndex;
