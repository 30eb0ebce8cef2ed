//! Live fixture instances
//!
//! A [`Fixture`] moves through `created -> setting-up -> ready | failed ->
//! tearing-down -> torn-down`. Setup spawns the factory and returns as soon
//! as the factory provides its value; the rest of the factory body is kept
//! paused as the fixture's teardown and resumed by [`Fixture::teardown`],
//! after every fixture that consumed this one has been torn down.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

use fixturekit_common::{
    Factory, FactoryFn, FixtureInfo, FixtureValue, Location, Params, ProvideChannel,
    Registration, RegistrationId, Scope, UseFn,
};

use crate::context::{
    FixturePhase, RunnableDescription, StepSpec, StepTracker, TestContext, TimeoutManager,
};
use crate::error::{FixtureError, FixtureResult};
use crate::runner::FixtureRunner;

/// Lifecycle state of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Created,
    SettingUp,
    Ready,
    Failed,
    TearingDown,
    TornDown,
}

impl FixtureState {
    /// Setup has finished, one way or the other
    pub fn is_settled(self) -> bool {
        !matches!(self, FixtureState::Created | FixtureState::SettingUp)
    }
}

impl fmt::Display for FixtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureState::Created => write!(f, "created"),
            FixtureState::SettingUp => write!(f, "setting-up"),
            FixtureState::Ready => write!(f, "ready"),
            FixtureState::Failed => write!(f, "failed"),
            FixtureState::TearingDown => write!(f, "tearing-down"),
            FixtureState::TornDown => write!(f, "torn-down"),
        }
    }
}

type SharedTeardown = Shared<BoxFuture<'static, FixtureResult<()>>>;
type FactoryOutcome = Result<anyhow::Result<()>, JoinError>;

/// The paused remainder of a factory body
struct SelfTeardown {
    resume: oneshot::Sender<()>,
    remainder: Remainder,
    steps: Option<Arc<dyn StepTracker>>,
}

enum Remainder {
    Running(JoinHandle<anyhow::Result<()>>),
    /// The factory body already returned right after providing its value
    Finished(FactoryOutcome),
}

#[derive(Default)]
struct FixtureInner {
    value: Option<FixtureValue>,
    failed: bool,
    deps: Vec<Arc<Fixture>>,
    pending: Option<SelfTeardown>,
}

/// One live instance of a registration
pub struct Fixture {
    registration: Arc<Registration>,
    state: watch::Sender<FixtureState>,
    inner: Mutex<FixtureInner>,
    teardown: Mutex<Option<SharedTeardown>>,
}

impl Fixture {
    pub(crate) fn new(registration: Arc<Registration>) -> Self {
        let (state, _) = watch::channel(FixtureState::Created);
        Self {
            registration,
            state,
            inner: Mutex::new(FixtureInner::default()),
            teardown: Mutex::new(None),
        }
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn id(&self) -> &RegistrationId {
        &self.registration.id
    }

    pub fn name(&self) -> &str {
        &self.registration.name
    }

    pub fn state(&self) -> FixtureState {
        *self.state.borrow()
    }

    pub fn value(&self) -> Option<FixtureValue> {
        self.inner.lock().value.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.lock().failed
    }

    /// Fixtures this one required, in resolution order
    pub fn dependencies(&self) -> Vec<Arc<Fixture>> {
        self.inner.lock().deps.clone()
    }

    /// Wait until setup has finished
    pub async fn settled(&self) {
        let mut state = self.state.subscribe();
        loop {
            let settled = state.borrow_and_update().is_settled();
            if settled || state.changed().await.is_err() {
                return;
            }
        }
    }

    fn description(&self, phase: FixturePhase) -> RunnableDescription {
        RunnableDescription::for_registration(&self.registration, phase)
    }

    fn location(&self) -> String {
        self.registration
            .location
            .clone()
            .unwrap_or_else(Location::unknown)
            .to_string()
    }

    pub(crate) async fn setup(
        self: &Arc<Self>,
        runner: &FixtureRunner,
        context: &TestContext,
    ) -> FixtureResult<()> {
        self.state.send_replace(FixtureState::SettingUp);
        let result = self.run_setup(runner, context).await;
        if result.is_err() {
            self.inner.lock().failed = true;
        }
        let settled = if self.is_failed() {
            FixtureState::Failed
        } else {
            FixtureState::Ready
        };
        self.state.send_replace(settled);
        result
    }

    async fn run_setup(
        self: &Arc<Self>,
        runner: &FixtureRunner,
        context: &TestContext,
    ) -> FixtureResult<()> {
        let factory = match &self.registration.factory {
            Factory::Value(value) => {
                self.inner.lock().value = Some(value.clone());
                return Ok(());
            }
            Factory::Function(factory) => factory.clone(),
        };

        let pool = runner.pool()?;
        let mut params = Params::new();
        for name in &self.registration.deps {
            let registration = pool
                .resolve_dependency(&self.registration, name)
                .ok_or_else(|| FixtureError::UnknownFixture {
                    name: name.clone(),
                    location: self.location(),
                })?;
            let dep = runner
                .setup_fixture_for_registration(&registration, context)
                .await?;

            // Teardown goes from the root to the leaves: a fixture tears down
            // its usages first, and leaves its dependencies' usages when it goes.
            runner.record_usage(dep.id(), self.id());
            self.inner.lock().deps.push(dep.clone());

            if dep.is_failed() {
                self.inner.lock().failed = true;
                return Ok(());
            }
            if let Some(value) = dep.value() {
                params.insert(name.clone(), value);
            }
        }

        self.run_factory(factory, params, context).await;
        Ok(())
    }

    async fn run_factory(&self, factory: FactoryFn, params: Params, context: &TestContext) {
        let registration = &self.registration;
        let steps = registration
            .generates_step()
            .then(|| context.steps().clone());
        let info = match registration.scope {
            Scope::Worker => FixtureInfo::Worker(context.info().worker.clone()),
            Scope::Test => FixtureInfo::Test(context.info().clone()),
        };

        debug!(fixture = %registration.name, "setup");
        context
            .timeouts()
            .set_current_fixture(Some(self.description(FixturePhase::Setup)));
        let setup_step = steps
            .as_ref()
            .map(|s| s.begin_step(StepSpec::fixture(registration)));

        let (use_fn, channel) = UseFn::channel(registration.name.clone());
        let ProvideChannel { mut value, resume } = channel;
        let mut task = tokio::spawn(factory(params, use_fn, info));

        let first = tokio::select! {
            biased;
            provided = &mut value => match provided {
                Ok(value) => Started::Provided(value),
                Err(_) => Started::HandleDropped,
            },
            joined = &mut task => Started::Finished(joined),
        };

        let outcome = match first {
            Started::Provided(value) => Ok((value, Remainder::Running(task))),
            Started::HandleDropped => Err(self.failure_without_value((&mut task).await)),
            // The body may provide and return before the value is observed.
            Started::Finished(joined) => match value.try_recv() {
                Ok(value) => Ok((value, Remainder::Finished(joined))),
                Err(_) => Err(self.failure_without_value(joined)),
            },
        };

        match outcome {
            Ok((value, remainder)) => {
                {
                    let mut inner = self.inner.lock();
                    inner.value = Some(value);
                    inner.pending = Some(SelfTeardown {
                        resume,
                        remainder,
                        steps: steps.clone(),
                    });
                }
                if let (Some(steps), Some(id)) = (&steps, setup_step) {
                    steps.complete_step(id, None);
                }
            }
            Err(error) => {
                self.inner.lock().failed = true;
                warn!(fixture = %registration.name, %error, "fixture setup failed");
                if let (Some(steps), Some(id)) = (&steps, setup_step) {
                    steps.complete_step(id, Some(error.to_string()));
                }
                context.push_error(error);
            }
        }

        context.timeouts().set_current_fixture(None);
    }

    fn failure_without_value(&self, joined: FactoryOutcome) -> FixtureError {
        let fixture = self.registration.name.clone();
        match joined {
            Ok(Ok(())) => FixtureError::NotProvided(fixture),
            Ok(Err(cause)) => FixtureError::Setup {
                fixture,
                cause: Arc::new(cause),
            },
            Err(join) => FixtureError::Panicked {
                fixture,
                message: panic_message(join),
            },
        }
    }

    /// Tear this fixture down after everything that used it. Concurrent and
    /// repeated calls share one teardown.
    pub fn teardown(
        self: &Arc<Self>,
        runner: &FixtureRunner,
        timeouts: &Arc<dyn TimeoutManager>,
    ) -> BoxFuture<'static, FixtureResult<()>> {
        let fixture = self.clone();
        let runner = runner.clone();
        let timeouts = timeouts.clone();

        async move {
            let (task, in_flight) = {
                let mut slot = fixture.teardown.lock();
                match slot.clone() {
                    Some(task) => (task, true),
                    None => {
                        let task = fixture
                            .clone()
                            .teardown_internal(runner, timeouts.clone())
                            .boxed()
                            .shared();
                        *slot = Some(task.clone());
                        (task, false)
                    }
                }
            };

            if !in_flight {
                return task.await;
            }

            // Waiting for the same teardown again, most likely after the first
            // wait timed out: point diagnostics at this fixture.
            timeouts.set_current_fixture(Some(fixture.description(FixturePhase::Teardown)));
            let result = task.await;
            timeouts.set_current_fixture(None);
            result
        }
        .boxed()
    }

    async fn teardown_internal(
        self: Arc<Self>,
        runner: FixtureRunner,
        timeouts: Arc<dyn TimeoutManager>,
    ) -> FixtureResult<()> {
        self.state.send_replace(FixtureState::TearingDown);
        let result = self.teardown_usages_then_self(&runner, &timeouts).await;
        runner.release(&self);
        self.state.send_replace(FixtureState::TornDown);
        result
    }

    async fn teardown_usages_then_self(
        self: &Arc<Self>,
        runner: &FixtureRunner,
        timeouts: &Arc<dyn TimeoutManager>,
    ) -> FixtureResult<()> {
        for usage in runner.usages_of(self.id()) {
            usage.teardown(runner, timeouts).await?;
        }
        if runner.has_usages(self.id()) {
            error!(
                fixture = %self.registration.title(),
                "Internal error: fixture integrity, usages left after teardown"
            );
            runner.clear_usages(self.id());
        }

        let pending = self.inner.lock().pending.take();
        let Some(SelfTeardown {
            resume,
            remainder,
            steps,
        }) = pending
        else {
            return Ok(());
        };

        debug!(fixture = %self.registration.name, "teardown");
        timeouts.set_current_fixture(Some(self.description(FixturePhase::Teardown)));
        let step = steps.map(|steps| {
            let id = steps.begin_step(StepSpec::fixture(&self.registration));
            (steps, id)
        });

        let _ = resume.send(());
        let joined = match remainder {
            Remainder::Running(task) => task.await,
            Remainder::Finished(joined) => joined,
        };
        let fixture = self.registration.name.clone();
        let outcome = match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(cause)) => Err(FixtureError::Teardown {
                fixture,
                cause: Arc::new(cause),
            }),
            Err(join) => Err(FixtureError::Panicked {
                fixture,
                message: panic_message(join),
            }),
        };

        if let Some((steps, id)) = step {
            steps.complete_step(id, outcome.as_ref().err().map(ToString::to_string));
        }
        if outcome.is_err() {
            self.inner.lock().failed = true;
        }
        timeouts.set_current_fixture(None);
        outcome
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("name", &self.registration.name)
            .field("id", &self.registration.id)
            .field("state", &self.state())
            .finish()
    }
}

enum Started {
    Provided(FixtureValue),
    HandleDropped,
    Finished(FactoryOutcome),
}

fn panic_message(join: JoinError) -> String {
    if !join.is_panic() {
        return join.to_string();
    }
    let payload = join.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
