//! Fixture factories and the provide-value protocol
//!
//! A factory is a single async body split in two by [`UseFn::provide`]:
//! everything before the call is setup, everything after it is teardown.
//! `provide` hands the value to the runner immediately and only returns once
//! the runner resumes the fixture for teardown.

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::config::FixtureInfo;
use crate::error::{Error, Result};

/// Type-erased fixture value
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// Future returned by a factory; resolves when its teardown part has finished
pub type FactoryFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Boxed factory function
pub type FactoryFn = Arc<dyn Fn(Params, UseFn, FixtureInfo) -> FactoryFuture + Send + Sync>;

/// How a registration produces its value
#[derive(Clone)]
pub enum Factory {
    /// A static value used as-is
    Value(FixtureValue),
    /// An async body that provides the value through [`UseFn`]
    Function(FactoryFn),
}

impl Factory {
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Params, UseFn, FixtureInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Factory::Function(Arc::new(move |params, use_fn, info| {
            f(params, use_fn, info).boxed()
        }))
    }

    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Factory::Value(Arc::new(value))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Factory::Function(_))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factory::Value(_) => f.write_str("Factory::Value(..)"),
            Factory::Function(_) => f.write_str("Factory::Function(..)"),
        }
    }
}

/// Runner side of a [`UseFn`]
pub struct ProvideChannel {
    /// Receives the provided value
    pub value: oneshot::Receiver<FixtureValue>,
    /// Resumes the factory past its provide call
    pub resume: oneshot::Sender<()>,
}

/// Provide-value handle passed to a factory. Must be used exactly once.
pub struct UseFn {
    fixture: String,
    value_tx: Mutex<Option<oneshot::Sender<FixtureValue>>>,
    resume_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl UseFn {
    /// Create a handle for `fixture` together with the runner side of it
    pub fn channel(fixture: impl Into<String>) -> (Self, ProvideChannel) {
        let (value_tx, value_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        let use_fn = Self {
            fixture: fixture.into(),
            value_tx: Mutex::new(Some(value_tx)),
            resume_rx: Mutex::new(Some(resume_rx)),
        };
        (
            use_fn,
            ProvideChannel {
                value: value_rx,
                resume: resume_tx,
            },
        )
    }

    /// Provide the fixture value. The returned future completes when the
    /// fixture is being torn down.
    pub fn provide<T: Any + Send + Sync>(&self, value: T) -> BoxFuture<'static, Result<()>> {
        self.provide_value(Arc::new(value))
    }

    /// Like [`UseFn::provide`], for a value that is already shared
    pub fn provide_value(&self, value: FixtureValue) -> BoxFuture<'static, Result<()>> {
        let Some(sender) = self.value_tx.lock().take() else {
            return future::ready(Err(Error::DoubleProvide(self.fixture.clone()))).boxed();
        };
        let resume = self.resume_rx.lock().take();
        // The runner may already be gone; teardown code still runs in that case.
        let _ = sender.send(value);
        async move {
            if let Some(resume) = resume {
                let _ = resume.await;
            }
            Ok(())
        }
        .boxed()
    }

    pub fn fixture(&self) -> &str {
        &self.fixture
    }
}

impl fmt::Debug for UseFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UseFn").field("fixture", &self.fixture).finish()
    }
}

/// Resolved fixture values, keyed by fixture name
#[derive(Clone, Default)]
pub struct Params {
    values: BTreeMap<String, FixtureValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FixtureValue) {
        self.values.insert(name.into(), value);
    }

    /// Typed access to a value
    pub fn get<T: Any>(&self, name: &str) -> Option<&T> {
        self.values.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Typed access that reports why the value is unavailable
    pub fn require<T: Any>(&self, name: &str) -> Result<&T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
        value.downcast_ref::<T>().ok_or_else(|| Error::ParameterType {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
    }

    pub fn value(&self, name: &str) -> Option<&FixtureValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
