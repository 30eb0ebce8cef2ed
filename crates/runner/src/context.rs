//! Collaborators the runner reports to while it works on behalf of a test

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use fixturekit_common::{Location, Registration, TestInfo};

use crate::error::FixtureError;
use crate::steps::StepLog;
use crate::timeout::FixtureTimeouts;

/// Phase a fixture is in when the timeout collaborator is annotated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixturePhase {
    Setup,
    Teardown,
}

impl fmt::Display for FixturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixturePhase::Setup => write!(f, "setup"),
            FixturePhase::Teardown => write!(f, "teardown"),
        }
    }
}

/// Dedicated time budget of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub timeout: Duration,
    pub elapsed: Duration,
}

/// The fixture currently running, as reported to the timeout collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableDescription {
    pub title: String,
    pub phase: FixturePhase,
    pub location: Option<Location>,
    pub slot: Option<TimeSlot>,
}

impl RunnableDescription {
    pub fn for_registration(registration: &Registration, phase: FixturePhase) -> Self {
        Self {
            title: registration.title().to_string(),
            phase,
            location: registration.location.clone(),
            slot: registration.timeout.map(|timeout| TimeSlot {
                timeout,
                elapsed: Duration::ZERO,
            }),
        }
    }
}

/// Receives the fixture currently in setup or teardown, so that a timeout can
/// be attributed to it
pub trait TimeoutManager: Send + Sync {
    fn set_current_fixture(&self, fixture: Option<RunnableDescription>);
}

/// Identifier of an open step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

/// Category of a tracked step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCategory {
    Fixture,
    Hook,
    TestStep,
}

/// Unit of work opened on a [`StepTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub title: String,
    pub category: StepCategory,
    pub location: Option<Location>,
}

impl StepSpec {
    /// `fixture: <name>` step of a registration
    pub fn fixture(registration: &Registration) -> Self {
        Self {
            title: format!("fixture: {}", registration.name),
            category: StepCategory::Fixture,
            location: registration.location.clone(),
        }
    }
}

/// Tracks named units of work and the errors attached to them
pub trait StepTracker: Send + Sync {
    fn begin_step(&self, step: StepSpec) -> StepId;
    fn complete_step(&self, id: StepId, error: Option<String>);
}

/// Per-test context handed to the runner
pub struct TestContext {
    info: TestInfo,
    timeouts: Arc<dyn TimeoutManager>,
    steps: Arc<dyn StepTracker>,
    errors: Mutex<Vec<FixtureError>>,
}

impl TestContext {
    pub fn new(
        info: TestInfo,
        timeouts: Arc<dyn TimeoutManager>,
        steps: Arc<dyn StepTracker>,
    ) -> Self {
        Self {
            info,
            timeouts,
            steps,
            errors: Mutex::new(Vec::new()),
        }
    }

    /// Context backed by the in-process [`FixtureTimeouts`] and [`StepLog`]
    pub fn recording(info: TestInfo) -> (Self, Arc<FixtureTimeouts>, Arc<StepLog>) {
        let timeouts = Arc::new(FixtureTimeouts::new());
        let steps = Arc::new(StepLog::new());
        let context = Self::new(info, timeouts.clone(), steps.clone());
        (context, timeouts, steps)
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    pub fn timeouts(&self) -> &Arc<dyn TimeoutManager> {
        &self.timeouts
    }

    pub fn steps(&self) -> &Arc<dyn StepTracker> {
        &self.steps
    }

    /// Record an error against the test
    pub fn push_error(&self, error: FixtureError) {
        self.errors.lock().push(error);
    }

    /// Errors recorded so far, e.g. fixture setup failures
    pub fn errors(&self) -> Vec<FixtureError> {
        self.errors.lock().clone()
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("test_id", &self.info.test_id)
            .field("title", &self.info.title)
            .finish()
    }
}
