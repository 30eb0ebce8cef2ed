//! Fixture pools
//!
//! A [`Pool`] is the validated, immutable set of registrations active for a
//! run. Its digest fingerprints every registration id, so two pools built
//! from the same declarations compare equal and a pool built with different
//! option values does not.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::options::UseOptions;
use crate::registration::{FixtureDecl, Registration};
use crate::types::{Location, RegistrationId, Scope};

/// Validated set of registrations, keyed by fixture name
#[derive(Debug)]
pub struct Pool {
    digest: String,
    registrations: Vec<Arc<Registration>>,
    by_name: HashMap<String, usize>,
}

impl Pool {
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Fingerprint of the registration set
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Effective registration for a fixture name
    pub fn registration(&self, name: &str) -> Option<&Arc<Registration>> {
        self.by_name.get(name).map(|&i| &self.registrations[i])
    }

    /// Effective registrations in declaration order
    pub fn registrations(&self) -> impl Iterator<Item = &Arc<Registration>> {
        self.registrations.iter()
    }

    /// Registration that dependency `name` of `registration` refers to.
    /// A fixture naming itself depends on the registration it overrides.
    pub fn resolve_dependency(
        &self,
        registration: &Registration,
        name: &str,
    ) -> Option<Arc<Registration>> {
        resolve(&self.registrations, &self.by_name, registration, name)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

fn resolve(
    registrations: &[Arc<Registration>],
    by_name: &HashMap<String, usize>,
    registration: &Registration,
    name: &str,
) -> Option<Arc<Registration>> {
    if name == registration.name {
        return registration.parent.clone();
    }
    by_name.get(name).map(|&i| registrations[i].clone())
}

/// Collects declarations and validates them into a [`Pool`]
#[derive(Debug, Default)]
pub struct PoolBuilder {
    registrations: Vec<Arc<Registration>>,
    by_name: HashMap<String, usize>,
    /// Declarations registered so far
    declared: usize,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration. Declaring a name twice overrides the earlier one.
    pub fn register(&mut self, decl: FixtureDecl) -> Result<&mut Self> {
        let slot = self.by_name.get(&decl.name).copied();
        let parent = slot.map(|i| self.registrations[i].clone());

        if let (Some(parent), Some(scope)) = (&parent, decl.scope) {
            if parent.scope != scope {
                return Err(Error::ScopeOverride {
                    fixture: decl.name.clone(),
                    existing: parent.scope.to_string(),
                    location: decl.location.clone().unwrap_or_else(Location::unknown),
                });
            }
        }

        let factory = decl
            .factory
            .clone()
            .ok_or_else(|| Error::MissingFactory(decl.name.clone()))?;
        let ordinal = self.declared;
        self.declared += 1;
        let registration = Arc::new(Registration::from_decl(decl, factory, parent, ordinal));
        debug!(fixture = %registration.name, id = %registration.id, "registered fixture");

        match slot {
            Some(i) => self.registrations[i] = registration,
            None => {
                self.by_name
                    .insert(registration.name.clone(), self.registrations.len());
                self.registrations.push(registration);
            }
        }
        Ok(self)
    }

    /// Override fixtures with the static values of an options document
    pub fn use_options(&mut self, options: &UseOptions) -> Result<&mut Self> {
        for decl in options.declarations() {
            self.register(decl)?;
        }
        Ok(self)
    }

    /// Validate the declarations and publish them as a pool
    pub fn build(self) -> Result<Pool> {
        let all = self.all_registrations();

        for registration in &all {
            for dep in &registration.deps {
                let location = || registration.location.clone().unwrap_or_else(Location::unknown);
                let resolved = resolve(&self.registrations, &self.by_name, registration, dep)
                    .ok_or_else(|| Error::UnknownDependency {
                        fixture: registration.name.clone(),
                        parameter: dep.clone(),
                        location: location(),
                    })?;
                if registration.scope == Scope::Worker && resolved.scope == Scope::Test {
                    return Err(Error::ScopeViolation {
                        fixture: registration.name.clone(),
                        dependency: dep.clone(),
                        location: location(),
                    });
                }
            }
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        for registration in &all {
            if let Some(cycle) = self.find_cycle(registration, &mut marks, &mut stack) {
                return Err(Error::DependencyCycle(cycle.join(" -> ")));
            }
        }

        let mut ids: Vec<&RegistrationId> = all.iter().map(|r| &r.id).collect();
        ids.sort();
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        debug!(%digest, fixtures = self.registrations.len(), "built fixture pool");

        Ok(Pool {
            digest,
            registrations: self.registrations,
            by_name: self.by_name,
        })
    }

    /// Effective registrations followed by every overridden ancestor
    fn all_registrations(&self) -> Vec<Arc<Registration>> {
        let mut all: Vec<Arc<Registration>> = Vec::new();
        for registration in &self.registrations {
            let mut current = Some(registration.clone());
            while let Some(r) = current {
                current = r.parent.clone();
                all.push(r);
            }
        }
        all
    }

    fn find_cycle(
        &self,
        registration: &Arc<Registration>,
        marks: &mut HashMap<RegistrationId, Mark>,
        stack: &mut Vec<Arc<Registration>>,
    ) -> Option<Vec<String>> {
        match marks.get(&registration.id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|r| r.id == registration.id)?;
                let mut names: Vec<String> = stack[start..]
                    .iter()
                    .map(|r| format!("\"{}\"", r.name))
                    .collect();
                names.push(format!("\"{}\"", registration.name));
                return Some(names);
            }
            None => {}
        }

        marks.insert(registration.id.clone(), Mark::Visiting);
        stack.push(registration.clone());
        for dep in &registration.deps {
            if let Some(resolved) = resolve(&self.registrations, &self.by_name, registration, dep) {
                if let Some(cycle) = self.find_cycle(&resolved, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(registration.id.clone(), Mark::Done);
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}
