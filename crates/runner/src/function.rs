//! Functions that request fixtures: tests and hooks

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use fixturekit_common::{Location, Params, TestInfo};

use crate::error::{FixtureError, FixtureResult};

/// Boxed body of a [`TestFunction`]
pub type FunctionBody =
    Arc<dyn Fn(Params, TestInfo) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A test or hook together with the fixture names it requests
#[derive(Clone)]
pub struct TestFunction {
    title: String,
    fixture_names: Vec<String>,
    location: Option<Location>,
    body: FunctionBody,
}

impl TestFunction {
    pub fn new<I, S, F, Fut>(title: impl Into<String>, fixture_names: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Params, TestInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            title: title.into(),
            fixture_names: fixture_names.into_iter().map(Into::into).collect(),
            location: None,
            body: Arc::new(move |params, info| body(params, info).boxed()),
        }
    }

    /// A function that only declares fixtures, with an empty body
    pub fn declaring<I, S>(title: impl Into<String>, fixture_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(title, fixture_names, |_, _| async { Ok(()) })
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Validated fixture names this function requests
    pub fn required_fixture_names(&self) -> FixtureResult<Vec<String>> {
        fixture_parameter_names(self.fixture_names.as_slice(), self.location.as_ref())
    }

    pub(crate) async fn invoke(&self, params: Params, info: TestInfo) -> FixtureResult<()> {
        (self.body)(params, info).await.map_err(|e| FixtureError::Function {
            title: self.title.clone(),
            cause: Arc::new(e),
        })
    }
}

impl fmt::Debug for TestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFunction")
            .field("title", &self.title)
            .field("fixture_names", &self.fixture_names)
            .field("location", &self.location)
            .finish()
    }
}

/// Check declared fixture names. Errors are prefixed with the location of
/// the function, or `<unknown>:1:1`.
pub fn fixture_parameter_names<S: AsRef<str>>(
    names: &[S],
    location: Option<&Location>,
) -> FixtureResult<Vec<String>> {
    let fail = |message: String| {
        let location = location.cloned().unwrap_or_else(Location::unknown);
        FixtureError::InvalidParameters(format!("{}: {}", location, message))
    };

    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(fail("fixture name must not be empty".to_string()));
        }
        if !is_identifier(name) {
            return Err(fail(format!("\"{}\" is not a valid fixture name", name)));
        }
        if !seen.insert(name) {
            return Err(fail(format!("fixture \"{}\" is requested twice", name)));
        }
        result.push(name.to_string());
    }
    Ok(result)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
