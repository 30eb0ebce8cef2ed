//! Reverse-dependency index
//!
//! Fixtures own only their forward dependencies. Which live fixtures consumed
//! a given fixture is derived from those edges and kept here, keyed by the
//! dependency's registration id, in the order the usages were recorded.

use std::collections::HashMap;

use fixturekit_common::RegistrationId;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageIndex {
    users: HashMap<RegistrationId, Vec<RegistrationId>>,
}

impl UsageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from `(dependency, user)` edges
    pub fn rebuild<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a RegistrationId, &'a RegistrationId)>,
    {
        let mut index = Self::new();
        for (dependency, user) in edges {
            index.record(dependency, user);
        }
        index
    }

    /// Record that `user` consumed `dependency`
    pub fn record(&mut self, dependency: &RegistrationId, user: &RegistrationId) {
        let users = self.users.entry(dependency.clone()).or_default();
        if !users.contains(user) {
            users.push(user.clone());
        }
    }

    pub fn users_of(&self, dependency: &RegistrationId) -> Vec<RegistrationId> {
        self.users.get(dependency).cloned().unwrap_or_default()
    }

    pub fn has_users(&self, dependency: &RegistrationId) -> bool {
        self.users
            .get(dependency)
            .map(|users| !users.is_empty())
            .unwrap_or(false)
    }

    pub fn remove(&mut self, dependency: &RegistrationId, user: &RegistrationId) {
        if let Some(users) = self.users.get_mut(dependency) {
            users.retain(|u| u != user);
            if users.is_empty() {
                self.users.remove(dependency);
            }
        }
    }

    /// Drop every usage of `dependency`, returning how many there were
    pub fn clear(&mut self, dependency: &RegistrationId) -> usize {
        self.users.remove(dependency).map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
