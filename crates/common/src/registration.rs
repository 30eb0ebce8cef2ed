//! Fixture declarations and the registrations a pool publishes

use sha2::{Digest, Sha256};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FixtureInfo;
use crate::factory::{Factory, Params, UseFn};
use crate::types::{AutoPolicy, Location, RegistrationId, Scope};

/// Declaration of a fixture, as written by the test author.
///
/// Unset fields of an override are inherited from the registration it
/// replaces when it is added to a [`crate::PoolBuilder`].
#[derive(Debug, Clone)]
pub struct FixtureDecl {
    pub name: String,
    pub factory: Option<Factory>,
    pub deps: Vec<String>,
    pub scope: Option<Scope>,
    pub auto: Option<AutoPolicy>,
    pub option: Option<bool>,
    pub timeout: Option<Duration>,
    pub location: Option<Location>,
    pub custom_title: Option<String>,
    pub hide_step: bool,
    /// Content fingerprint of a static value, folded into the registration id
    pub fingerprint: Option<String>,
}

impl FixtureDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: None,
            deps: Vec::new(),
            scope: None,
            auto: None,
            option: None,
            timeout: None,
            location: None,
            custom_title: None,
            hide_step: false,
            fingerprint: None,
        }
    }

    /// Declare a fixture computed by an async factory
    pub fn factory<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Params, UseFn, FixtureInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name).with_factory(Factory::from_fn(f))
    }

    /// Declare a fixture with a static value
    pub fn value<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self::new(name).with_factory(Factory::value(value))
    }

    /// Declare an option value coming from configuration. The value takes
    /// part in the registration id, so differing options change the digest.
    pub fn json_value(name: impl Into<String>, value: serde_json::Value) -> Self {
        let fingerprint = value.to_string();
        let mut decl = Self::value(name, value);
        decl.fingerprint = Some(fingerprint);
        decl
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn worker(self) -> Self {
        self.scope(Scope::Worker)
    }

    pub fn auto(mut self, auto: AutoPolicy) -> Self {
        self.auto = Some(auto);
        self
    }

    pub fn option(mut self) -> Self {
        self.option = Some(true);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.custom_title = Some(title.into());
        self
    }

    pub fn hide_step(mut self) -> Self {
        self.hide_step = true;
        self
    }
}

/// Immutable registration of a fixture inside a pool
pub struct Registration {
    pub id: RegistrationId,
    pub name: String,
    pub factory: Factory,
    pub deps: Vec<String>,
    pub scope: Scope,
    pub auto: AutoPolicy,
    pub option: bool,
    pub timeout: Option<Duration>,
    pub location: Option<Location>,
    pub custom_title: Option<String>,
    pub hide_step: bool,
    /// Registration this one overrides
    pub parent: Option<Arc<Registration>>,
}

impl Registration {
    /// `ordinal` is the position of the declaration in its builder. It stands
    /// in for the location of declarations that carry neither a location nor
    /// a value fingerprint.
    pub(crate) fn from_decl(
        decl: FixtureDecl,
        factory: Factory,
        parent: Option<Arc<Registration>>,
        ordinal: usize,
    ) -> Self {
        let scope = decl
            .scope
            .or_else(|| parent.as_ref().map(|p| p.scope))
            .unwrap_or_default();
        let auto = decl
            .auto
            .or_else(|| parent.as_ref().map(|p| p.auto))
            .unwrap_or_default();
        let option = decl
            .option
            .or_else(|| parent.as_ref().map(|p| p.option))
            .unwrap_or(false);
        let id = registration_id(&IdInputs {
            decl: &decl,
            scope,
            auto,
            option,
            parent: parent.as_ref().map(|p| &p.id),
            ordinal,
        });

        Self {
            id,
            name: decl.name,
            factory,
            deps: decl.deps,
            scope,
            auto,
            option,
            timeout: decl.timeout,
            location: decl.location,
            custom_title: decl.custom_title,
            hide_step: decl.hide_step,
            parent,
        }
    }

    /// Title used in timeout diagnostics
    pub fn title(&self) -> &str {
        self.custom_title.as_deref().unwrap_or(&self.name)
    }

    /// Internal fixtures are prefixed with an underscore
    pub fn is_internal(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Whether setup/teardown of this fixture is reported as steps
    pub fn generates_step(&self) -> bool {
        !self.hide_step && !self.is_internal() && !self.option && !self.auto.is_auto()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("scope", &self.scope)
            .field("auto", &self.auto)
            .field("option", &self.option)
            .field("location", &self.location)
            .field("parent", &self.parent.as_ref().map(|p| &p.id))
            .finish()
    }
}

struct IdInputs<'a> {
    decl: &'a FixtureDecl,
    scope: Scope,
    auto: AutoPolicy,
    option: bool,
    parent: Option<&'a RegistrationId>,
    ordinal: usize,
}

fn registration_id(inputs: &IdInputs<'_>) -> RegistrationId {
    let decl = inputs.decl;
    let mut hasher = Sha256::new();
    hasher.update(decl.name.as_bytes());
    hasher.update(b"@");
    match (&decl.location, &decl.fingerprint) {
        (Some(location), _) => hasher.update(location.to_string().as_bytes()),
        (None, None) => hasher.update(format!("#{}", inputs.ordinal).as_bytes()),
        (None, Some(_)) => {}
    }
    hasher.update(b"^");
    if let Some(parent) = inputs.parent {
        hasher.update(parent.as_str().as_bytes());
    }
    hasher.update(b"=");
    if let Some(fingerprint) = &decl.fingerprint {
        hasher.update(fingerprint.as_bytes());
    }
    hasher.update(
        format!(
            "|{}|{:?}|{}|{}",
            inputs.scope,
            inputs.auto,
            inputs.option,
            decl.deps.join(",")
        )
        .as_bytes(),
    );
    RegistrationId::new(hex::encode(&hasher.finalize()[..16]))
}
