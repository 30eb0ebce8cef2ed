//! Fixture runner: the per-worker registry of live fixtures

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use fixturekit_common::{AutoFixtures, Location, Params, Pool, Registration, RegistrationId, Scope};

use crate::context::{TestContext, TimeoutManager};
use crate::error::{FixtureError, FixtureResult};
use crate::fixture::Fixture;
use crate::function::TestFunction;
use crate::usage::UsageIndex;

/// Outcome of [`FixtureRunner::resolve_parameters_and_run_function`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// A fixture failed, the function was not called
    Skipped,
    /// The function ran to completion
    Completed,
}

/// Memoizes fixtures per registration id, resolves the fixtures a function
/// asks for and tears them down per scope.
///
/// Cloning is cheap and every clone shares the same cache. Separate runners
/// never share state.
#[derive(Clone, Default)]
pub struct FixtureRunner {
    state: Arc<Mutex<RunnerState>>,
}

#[derive(Default)]
struct RunnerState {
    pool: Option<Arc<Pool>>,
    instances: HashMap<RegistrationId, Arc<Fixture>>,
    /// Registration ids in creation order
    order: Vec<RegistrationId>,
    usages: UsageIndex,
    test_scope_dirty: bool,
}

impl FixtureRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a pool
    pub fn set_pool(&self, pool: Arc<Pool>) -> FixtureResult<()> {
        let mut state = self.state.lock();
        if state.test_scope_dirty {
            return Err(FixtureError::TestScopeNotTornDown);
        }
        if let Some(active) = &state.pool {
            if active.digest() != pool.digest() {
                return Err(FixtureError::InconsistentOptions {
                    active: active.digest().to_string(),
                    requested: pool.digest().to_string(),
                });
            }
        } else {
            info!(digest = %pool.digest(), fixtures = pool.len(), "activated fixture pool");
        }
        state.pool = Some(pool);
        Ok(())
    }

    pub fn pool(&self) -> FixtureResult<Arc<Pool>> {
        self.state.lock().pool.clone().ok_or(FixtureError::NoPool)
    }

    /// Tear down every live fixture of `scope`, newest first. Every fixture
    /// gets a teardown attempt; the first error is returned afterwards.
    pub async fn teardown_scope(
        &self,
        scope: Scope,
        timeouts: &Arc<dyn TimeoutManager>,
    ) -> FixtureResult<()> {
        let fixtures: Vec<Arc<Fixture>> = {
            let state = self.state.lock();
            state
                .order
                .iter()
                .rev()
                .filter_map(|id| state.instances.get(id).cloned())
                .filter(|fixture| fixture.registration().scope == scope)
                .collect()
        };
        if !fixtures.is_empty() {
            debug!(%scope, fixtures = fixtures.len(), "tearing down scope");
        }

        let mut first_error = None;
        for fixture in fixtures {
            if let Err(error) = fixture.teardown(self, timeouts).await {
                warn!(fixture = %fixture.name(), %error, "fixture teardown failed");
                first_error.get_or_insert(error);
            }
        }

        if scope == Scope::Test {
            self.state.lock().test_scope_dirty = false;
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Set up the auto fixtures selected by `auto_fixtures` and every fixture
    /// `function` requests. Returns `None` when any of them failed.
    pub async fn resolve_parameters_for_function(
        &self,
        function: &TestFunction,
        context: &TestContext,
        auto_fixtures: AutoFixtures,
    ) -> FixtureResult<Option<Params>> {
        let pool = self.pool()?;

        let mut auto: Vec<Arc<Registration>> = pool
            .registrations()
            .filter(|r| auto_fixtures.selects(r.scope, r.auto))
            .cloned()
            .collect();
        // Worker fixtures first; stable, so declaration order holds within a scope.
        auto.sort_by_key(|r| r.scope != Scope::Worker);
        for registration in &auto {
            let fixture = self.setup_fixture_for_registration(registration, context).await?;
            if fixture.is_failed() {
                return Ok(None);
            }
        }

        let mut params = Params::new();
        for name in function.required_fixture_names()? {
            let registration = pool.registration(&name).cloned().ok_or_else(|| {
                FixtureError::UnknownFixture {
                    name: name.clone(),
                    location: function
                        .location()
                        .cloned()
                        .unwrap_or_else(Location::unknown)
                        .to_string(),
                }
            })?;
            let fixture = self.setup_fixture_for_registration(&registration, context).await?;
            if fixture.is_failed() {
                return Ok(None);
            }
            if let Some(value) = fixture.value() {
                params.insert(name, value);
            }
        }
        Ok(Some(params))
    }

    /// Resolve the fixtures of `function` and call it, unless a fixture failed
    pub async fn resolve_parameters_and_run_function(
        &self,
        function: &TestFunction,
        context: &TestContext,
        auto_fixtures: AutoFixtures,
    ) -> FixtureResult<Invocation> {
        let Some(params) = self
            .resolve_parameters_for_function(function, context, auto_fixtures)
            .await?
        else {
            debug!(function = %function.title(), "fixture setup failed, not running");
            return Ok(Invocation::Skipped);
        };
        function.invoke(params, context.info().clone()).await?;
        Ok(Invocation::Completed)
    }

    /// Get or create the fixture of `registration`. The instance is cached
    /// before its setup starts; a request that finds an instance still being
    /// set up waits for that setup.
    pub fn setup_fixture_for_registration<'a>(
        &'a self,
        registration: &'a Arc<Registration>,
        context: &'a TestContext,
    ) -> BoxFuture<'a, FixtureResult<Arc<Fixture>>> {
        async move {
            let (fixture, created) = {
                let mut state = self.state.lock();
                if registration.scope == Scope::Test {
                    state.test_scope_dirty = true;
                }
                match state.instances.get(&registration.id) {
                    Some(fixture) => (fixture.clone(), false),
                    None => {
                        let fixture = Arc::new(Fixture::new(registration.clone()));
                        state
                            .instances
                            .insert(registration.id.clone(), fixture.clone());
                        state.order.push(registration.id.clone());
                        (fixture, true)
                    }
                }
            };

            if created {
                fixture.setup(self, context).await?;
            } else {
                fixture.settled().await;
            }
            Ok(fixture)
        }
        .boxed()
    }

    /// Whether `function` and everything it transitively requests is
    /// worker-scoped
    pub fn depends_on_worker_fixtures_only(&self, function: &TestFunction) -> FixtureResult<bool> {
        let pool = self.pool()?;
        let mut pending = Vec::new();
        for name in function.required_fixture_names()? {
            let registration = pool.registration(&name).cloned().ok_or_else(|| {
                FixtureError::UnknownFixture {
                    name,
                    location: function
                        .location()
                        .cloned()
                        .unwrap_or_else(Location::unknown)
                        .to_string(),
                }
            })?;
            pending.push(registration);
        }

        let mut visited = HashSet::new();
        while let Some(registration) = pending.pop() {
            if !visited.insert(registration.id.clone()) {
                continue;
            }
            if registration.scope != Scope::Worker {
                return Ok(false);
            }
            pending.extend(
                registration
                    .deps
                    .iter()
                    .filter_map(|dep| pool.resolve_dependency(&registration, dep)),
            );
        }
        Ok(true)
    }

    /// Names of live fixtures, oldest first
    pub fn active_fixtures(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.instances.get(id))
            .map(|fixture| fixture.name().to_string())
            .collect()
    }

    pub fn instance(&self, id: &RegistrationId) -> Option<Arc<Fixture>> {
        self.state.lock().instances.get(id).cloned()
    }

    pub fn is_test_scope_clean(&self) -> bool {
        !self.state.lock().test_scope_dirty
    }

    /// Recompute the usage index from the live fixtures' dependencies
    pub fn rebuild_usage_index(&self) {
        let fixtures: Vec<Arc<Fixture>> = {
            let state = self.state.lock();
            state
                .order
                .iter()
                .filter_map(|id| state.instances.get(id).cloned())
                .collect()
        };
        let edges: Vec<(RegistrationId, RegistrationId)> = fixtures
            .iter()
            .flat_map(|user| {
                user.dependencies()
                    .into_iter()
                    .map(move |dep| (dep.id().clone(), user.id().clone()))
            })
            .collect();

        let mut state = self.state.lock();
        let live: Vec<&(RegistrationId, RegistrationId)> = edges
            .iter()
            .filter(|(dep, user)| {
                state.instances.contains_key(dep) && state.instances.contains_key(user)
            })
            .collect();
        state.usages = UsageIndex::rebuild(live.into_iter().map(|(dep, user)| (dep, user)));
    }

    pub(crate) fn record_usage(&self, dependency: &RegistrationId, user: &RegistrationId) {
        self.state.lock().usages.record(dependency, user);
    }

    /// Live fixtures that consumed `dependency`
    pub(crate) fn usages_of(&self, dependency: &RegistrationId) -> Vec<Arc<Fixture>> {
        let state = self.state.lock();
        state
            .usages
            .users_of(dependency)
            .iter()
            .filter_map(|id| state.instances.get(id).cloned())
            .collect()
    }

    pub(crate) fn has_usages(&self, dependency: &RegistrationId) -> bool {
        self.state.lock().usages.has_users(dependency)
    }

    pub(crate) fn clear_usages(&self, dependency: &RegistrationId) {
        self.state.lock().usages.clear(dependency);
    }

    /// Leave the dependencies' usages and drop `fixture` from the cache
    pub(crate) fn release(&self, fixture: &Arc<Fixture>) {
        let deps = fixture.dependencies();
        let mut state = self.state.lock();
        for dep in &deps {
            state.usages.remove(dep.id(), fixture.id());
        }
        let cached = state
            .instances
            .get(fixture.id())
            .map(|f| Arc::ptr_eq(f, fixture))
            .unwrap_or(false);
        if cached {
            state.instances.remove(fixture.id());
            state.order.retain(|id| id != fixture.id());
        }
    }
}

impl std::fmt::Debug for FixtureRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureRunner")
            .field("active_fixtures", &self.active_fixtures())
            .field("test_scope_clean", &self.is_test_scope_clean())
            .finish()
    }
}
