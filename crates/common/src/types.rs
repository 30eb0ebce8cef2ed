//! Core types for fixturekit

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime bucket of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Lives for the whole worker process
    Worker,
    /// Lives for a single test
    Test,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Test
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Worker => write!(f, "worker"),
            Scope::Test => write!(f, "test"),
        }
    }
}

/// Whether a fixture is instantiated without being named by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoPolicy {
    Off,
    On,
    /// Also installed for hooks that only take worker fixtures
    AllHooksIncluded,
}

impl Default for AutoPolicy {
    fn default() -> Self {
        Self::Off
    }
}

impl AutoPolicy {
    pub fn is_auto(self) -> bool {
        !matches!(self, AutoPolicy::Off)
    }
}

/// Which automatic fixtures a resolution pass installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoFixtures {
    /// Every auto fixture
    All,
    /// Worker-scoped auto fixtures only
    Worker,
    /// Worker-scoped ones plus those declared `all-hooks-included`
    AllHooksOnly,
}

impl AutoFixtures {
    /// Returns true if an auto fixture with this scope/policy is installed in this mode
    pub fn selects(self, scope: Scope, auto: AutoPolicy) -> bool {
        if !auto.is_auto() {
            return false;
        }
        match self {
            AutoFixtures::All => true,
            AutoFixtures::Worker => scope == Scope::Worker,
            AutoFixtures::AllHooksOnly => {
                scope == Scope::Worker || auto == AutoPolicy::AllHooksIncluded
            }
        }
    }
}

/// Source location of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Placeholder used when a declaration carries no location
    pub fn unknown() -> Self {
        Self::new("<unknown>", 1, 1)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Content-derived identifier of a registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationId(String);

impl RegistrationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
