//! In-process step tracker

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use fixturekit_common::Location;

use crate::context::{StepCategory, StepId, StepSpec, StepTracker};

/// A step as recorded by [`StepLog`]
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub id: StepId,
    pub title: String,
    pub category: StepCategory,
    pub location: Option<Location>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Step tracker that keeps every step in memory, in the order steps begin
#[derive(Debug, Default)]
pub struct StepLog {
    records: Mutex<Vec<StepRecord>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.records.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.title.clone()).collect()
    }

    /// Steps that were opened but never completed
    pub fn open_steps(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| !r.is_complete())
            .cloned()
            .collect()
    }
}

impl StepTracker for StepLog {
    fn begin_step(&self, step: StepSpec) -> StepId {
        let id = StepId::new();
        debug!(title = %step.title, "step started");
        self.records.lock().push(StepRecord {
            id,
            title: step.title,
            category: step.category,
            location: step.location,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        });
        id
    }

    fn complete_step(&self, id: StepId, error: Option<String>) {
        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.completed_at = Some(Utc::now());
            record.error = error;
        }
    }
}
