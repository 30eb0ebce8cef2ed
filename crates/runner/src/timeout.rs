//! In-process timeout collaborator
//!
//! Remembers which fixture is running so that a timeout raised elsewhere can
//! name it. Aborting a stuck factory is left to whoever owns the deadline.

use parking_lot::Mutex;

use crate::context::{RunnableDescription, TimeoutManager};

#[derive(Debug, Default)]
pub struct FixtureTimeouts {
    current: Mutex<Option<RunnableDescription>>,
    history: Mutex<Vec<RunnableDescription>>,
}

impl FixtureTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixture currently in setup or teardown
    pub fn current(&self) -> Option<RunnableDescription> {
        self.current.lock().clone()
    }

    /// Every fixture annotation received, oldest first
    pub fn history(&self) -> Vec<RunnableDescription> {
        self.history.lock().clone()
    }

    /// Diagnostic for a timeout hit right now
    pub fn timeout_message(&self, timeout_ms: u64) -> String {
        match self.current() {
            Some(fixture) => {
                let location = fixture
                    .location
                    .map(|l| format!(" at {}", l))
                    .unwrap_or_default();
                format!(
                    "Fixture \"{}\" timeout of {}ms exceeded during {}{}.",
                    fixture.title, timeout_ms, fixture.phase, location
                )
            }
            None => format!("Test timeout of {}ms exceeded.", timeout_ms),
        }
    }
}

impl TimeoutManager for FixtureTimeouts {
    fn set_current_fixture(&self, fixture: Option<RunnableDescription>) {
        if let Some(fixture) = &fixture {
            self.history.lock().push(fixture.clone());
        }
        *self.current.lock() = fixture;
    }
}
