//! Run configuration and the worker/test metadata handed to factories

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Configuration of a test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Number of worker processes the scheduler starts
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Project this run executes
    #[serde(default)]
    pub project: ProjectConfig,

    /// Default tracing filter used by `init_tracing`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_workers() -> usize {
    1
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            project: ProjectConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl RunnerConfig {
    /// Parse a run configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a run configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.project.name.is_empty() {
            return Err(Error::InvalidConfig("project name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Project section of the run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,

    /// Free-form metadata exposed to fixtures
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Read-only worker metadata, passed to worker-scoped factories
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub config: Arc<RunnerConfig>,
    pub parallel_index: usize,
    pub worker_index: usize,
    pub project: ProjectConfig,
}

impl WorkerInfo {
    pub fn new(config: Arc<RunnerConfig>, worker_index: usize, parallel_index: usize) -> Self {
        let project = config.project.clone();
        Self {
            config,
            parallel_index,
            worker_index,
            project,
        }
    }
}

impl Default for WorkerInfo {
    fn default() -> Self {
        Self::new(Arc::new(RunnerConfig::default()), 0, 0)
    }
}

/// Read-only test metadata, passed to test-scoped factories and test bodies
#[derive(Debug, Clone)]
pub struct TestInfo {
    pub worker: WorkerInfo,
    pub test_id: String,
    pub title: String,
    pub location: Option<crate::types::Location>,
}

impl TestInfo {
    pub fn new(worker: WorkerInfo, test_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            worker,
            test_id: test_id.into(),
            title: title.into(),
            location: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.worker.config
    }
}

/// Metadata handed to a factory; the shape depends on the fixture scope
#[derive(Debug, Clone)]
pub enum FixtureInfo {
    Worker(WorkerInfo),
    Test(TestInfo),
}

impl FixtureInfo {
    pub fn worker(&self) -> &WorkerInfo {
        match self {
            FixtureInfo::Worker(worker) => worker,
            FixtureInfo::Test(test) => &test.worker,
        }
    }

    pub fn test(&self) -> Option<&TestInfo> {
        match self {
            FixtureInfo::Worker(_) => None,
            FixtureInfo::Test(test) => Some(test),
        }
    }
}
