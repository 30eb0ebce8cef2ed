//! Declarative option overrides in YAML
//!
//! An options document overrides fixtures with static values, the way a test
//! file pins options for all of its tests:
//!
//! ```yaml
//! file: tests/checkout.spec.ts
//! options:
//!   baseURL: https://shop.local
//!   locale: de-DE
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::registration::FixtureDecl;
use crate::types::Location;

/// Option values declared for one test file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UseOptions {
    /// Test file the options apply to
    #[serde(default)]
    pub file: Option<String>,

    /// Fixture name to static value
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl UseOptions {
    /// Parse an options document from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    /// Parse an options document from a YAML file. A document without a
    /// `file` entry is attributed to the file it was read from.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut options = Self::from_yaml(&content)?;
        if options.file.is_none() {
            options.file = Some(path.display().to_string());
        }
        Ok(options)
    }

    /// Load all options documents from a directory
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut documents = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            documents.push(Self::from_file(entry.path())?);
        }

        Ok(documents)
    }

    /// Static-value declarations overriding the named fixtures
    pub fn declarations(&self) -> impl Iterator<Item = FixtureDecl> + '_ {
        let location = self.file.as_ref().map(|file| Location::new(file.clone(), 1, 1));
        self.options.iter().map(move |(name, value)| {
            let decl = FixtureDecl::json_value(name.clone(), value.clone());
            match &location {
                Some(location) => decl.location(location.clone()),
                None => decl,
            }
        })
    }
}
