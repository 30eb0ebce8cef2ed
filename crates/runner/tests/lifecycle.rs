//! Setup, caching and scoped teardown of fixtures

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fixturekit_common::{
    AutoFixtures, AutoPolicy, FixtureDecl, FixtureInfo, Pool, RunnerConfig, Scope, TestInfo,
    WorkerInfo,
};
use fixturekit_runner::{
    FixtureError, FixtureRunner, FixtureState, FixtureTimeouts, Invocation, StepLog, TestContext,
    TestFunction,
};

type Events = Arc<Mutex<Vec<String>>>;

fn context() -> (TestContext, Arc<FixtureTimeouts>, Arc<StepLog>) {
    let worker = WorkerInfo::new(Arc::new(RunnerConfig::default()), 2, 1);
    TestContext::recording(TestInfo::new(worker, "t1", "adds an address"))
}

fn pool(decls: Vec<FixtureDecl>) -> Arc<Pool> {
    let mut builder = Pool::builder();
    for decl in decls {
        builder.register(decl).unwrap();
    }
    Arc::new(builder.build().unwrap())
}

/// Fixture whose value is its own name, logging setup and teardown
fn tracked(name: &str, events: &Events) -> FixtureDecl {
    let events = events.clone();
    let fixture = name.to_string();
    FixtureDecl::factory(name, move |_params, use_fn, _info| {
        let events = events.clone();
        let name = fixture.clone();
        async move {
            events.lock().push(format!("setup {}", name));
            use_fn.provide(name.clone()).await?;
            events.lock().push(format!("teardown {}", name));
            Ok(())
        }
    })
}

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn log(events: &Events) -> Vec<String> {
    events.lock().clone()
}

#[tokio::test]
async fn test_worker_and_test_scopes_are_torn_down_separately() {
    let events = events();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            tracked("db", &events).worker(),
            tracked("page", &events).deps(["db"]),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("fills the form", ["page"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .expect("fixtures should resolve");

    assert_eq!(params.get::<String>("page").map(String::as_str), Some("page"));
    assert!(!params.contains("db"));
    assert_eq!(log(&events), vec!["setup db", "setup page"]);
    assert!(!runner.is_test_scope_clean());

    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    assert_eq!(log(&events), vec!["setup db", "setup page", "teardown page"]);
    assert_eq!(runner.active_fixtures(), vec!["db"]);
    assert!(runner.is_test_scope_clean());

    runner.teardown_scope(Scope::Worker, ctx.timeouts()).await.unwrap();
    assert_eq!(
        log(&events),
        vec!["setup db", "setup page", "teardown page", "teardown db"]
    );
    assert!(runner.active_fixtures().is_empty());
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents_and_function() {
    let y_calls = Arc::new(AtomicUsize::new(0));
    let body_calls = Arc::new(AtomicUsize::new(0));

    let runner = FixtureRunner::new();
    let counter = y_calls.clone();
    runner
        .set_pool(pool(vec![
            FixtureDecl::factory("x", |_, _, _| async { anyhow::bail!("x exploded") }),
            FixtureDecl::factory("y", move |_, use_fn, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    use_fn.provide(()).await?;
                    Ok(())
                }
            })
            .deps(["x"]),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let calls = body_calls.clone();
    let test = TestFunction::new("needs y", ["y"], move |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert!(params.is_none());

    let outcome = runner
        .resolve_parameters_and_run_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert_eq!(outcome, Invocation::Skipped);

    assert_eq!(y_calls.load(Ordering::SeqCst), 0);
    assert_eq!(body_calls.load(Ordering::SeqCst), 0);

    let errors = ctx.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], FixtureError::Setup { fixture, .. } if fixture == "x"));
    assert!(errors[0].to_string().contains("x exploded"));

    // Failed fixtures still leave the scope cleanly.
    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    assert!(runner.active_fixtures().is_empty());
}

#[tokio::test]
async fn test_worker_auto_fixtures_set_up_before_test_ones() {
    let events = events();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            tracked("trace", &events).auto(AutoPolicy::On),
            tracked("server", &events).worker().auto(AutoPolicy::On),
            tracked("idle", &events),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("no fixtures", Vec::<String>::new());
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .unwrap();

    assert!(params.is_empty());
    assert_eq!(log(&events), vec!["setup server", "setup trace"]);
}

#[tokio::test]
async fn test_auto_modes_select_fixtures() {
    let events = events();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            tracked("trace", &events).auto(AutoPolicy::On),
            tracked("video", &events).auto(AutoPolicy::AllHooksIncluded),
            tracked("server", &events).worker().auto(AutoPolicy::On),
        ]))
        .unwrap();
    let (ctx, _, _) = context();
    let hook = TestFunction::declaring("beforeAll", Vec::<String>::new());

    runner
        .resolve_parameters_for_function(&hook, &ctx, AutoFixtures::Worker)
        .await
        .unwrap();
    assert_eq!(runner.active_fixtures(), vec!["server"]);

    runner
        .resolve_parameters_for_function(&hook, &ctx, AutoFixtures::AllHooksOnly)
        .await
        .unwrap();
    assert_eq!(runner.active_fixtures(), vec!["server", "video"]);

    runner
        .resolve_parameters_for_function(&hook, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert_eq!(runner.active_fixtures(), vec!["server", "video", "trace"]);
}

#[tokio::test]
async fn test_resolves_exactly_reachable_and_auto_fixtures() {
    let events = events();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            tracked("c", &events),
            tracked("b", &events).deps(["c"]),
            tracked("a", &events).deps(["b"]),
            tracked("unrelated", &events),
            tracked("auto", &events).auto(AutoPolicy::On),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("uses a", ["a"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(params.names().collect::<Vec<_>>(), vec!["a"]);
    let mut active = runner.active_fixtures();
    active.sort();
    assert_eq!(active, vec!["a", "auto", "b", "c"]);
    assert_eq!(log(&events), vec!["setup auto", "setup c", "setup b", "setup a"]);
}

#[tokio::test]
async fn test_second_test_scope_teardown_is_a_no_op() {
    let events = events();
    let runner = FixtureRunner::new();
    runner.set_pool(pool(vec![tracked("page", &events)])).unwrap();
    let (ctx, timeouts, _) = context();

    let test = TestFunction::declaring("uses page", ["page"]);
    runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    let after_first = log(&events);
    let annotations = timeouts.history().len();

    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    assert_eq!(log(&events), after_first);
    assert_eq!(timeouts.history().len(), annotations);
    assert!(runner.is_test_scope_clean());
}

#[tokio::test]
async fn test_torn_down_fixture_is_recreated_on_next_request() {
    let events = events();
    let runner = FixtureRunner::new();
    runner.set_pool(pool(vec![tracked("page", &events)])).unwrap();
    let (ctx, _, _) = context();
    let test = TestFunction::declaring("uses page", ["page"]);

    for _ in 0..2 {
        runner
            .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
            .await
            .unwrap();
        runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    }

    assert_eq!(
        log(&events),
        vec!["setup page", "teardown page", "setup page", "teardown page"]
    );
}

#[tokio::test]
async fn test_one_instance_per_registration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            FixtureDecl::factory("db", move |_, use_fn, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::task::yield_now().await;
                    use_fn.provide(7u32).await?;
                    Ok(())
                }
            })
            .worker(),
            FixtureDecl::factory("left", |params, use_fn, _| async move {
                let db = *params.require::<u32>("db")?;
                use_fn.provide(db + 1).await?;
                Ok(())
            })
            .deps(["db"]),
            FixtureDecl::factory("right", |params, use_fn, _| async move {
                let db = *params.require::<u32>("db")?;
                use_fn.provide(db + 2).await?;
                Ok(())
            })
            .deps(["db"]),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    // Diamond: both branches share one `db`.
    let test = TestFunction::declaring("diamond", ["left", "right"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(params.get::<u32>("left"), Some(&8));
    assert_eq!(params.get::<u32>("right"), Some(&9));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Later requests reuse the cached instance.
    let other = TestFunction::declaring("db only", ["db"]);
    let (first, second) = tokio::join!(
        runner.resolve_parameters_for_function(&other, &ctx, AutoFixtures::All),
        runner.resolve_parameters_for_function(&other, &ctx, AutoFixtures::All),
    );
    assert_eq!(first.unwrap().unwrap().get::<u32>("db"), Some(&7));
    assert_eq!(second.unwrap().unwrap().get::<u32>("db"), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_first_requests_share_setup() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![FixtureDecl::factory("server", move |_, use_fn, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                use_fn.provide(String::from("http://127.0.0.1")).await?;
                Ok(())
            }
        })
        .worker()]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("server", ["server"]);
    let (first, second) = tokio::join!(
        runner.resolve_parameters_for_function(&test, &ctx, AutoFixtures::All),
        runner.resolve_parameters_for_function(&test, &ctx, AutoFixtures::All),
    );

    assert!(first.unwrap().is_some());
    let second = second.unwrap().unwrap();
    assert_eq!(
        second.get::<String>("server").map(String::as_str),
        Some("http://127.0.0.1")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_factories_receive_info_by_scope() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (worker_seen, test_seen) = (seen.clone(), seen.clone());
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            FixtureDecl::factory("db", move |_, use_fn, info: FixtureInfo| {
                worker_seen.lock().push(match &info {
                    FixtureInfo::Worker(w) => format!("worker {}/{}", w.worker_index, w.parallel_index),
                    FixtureInfo::Test(_) => "unexpected test info".to_string(),
                });
                async move {
                    use_fn.provide(()).await?;
                    Ok(())
                }
            })
            .worker(),
            FixtureDecl::factory("page", move |_, use_fn, info: FixtureInfo| {
                test_seen.lock().push(match info.test() {
                    Some(test) => format!("test {}", test.title),
                    None => "unexpected worker info".to_string(),
                });
                async move {
                    use_fn.provide(()).await?;
                    Ok(())
                }
            })
            .deps(["db"]),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("uses page", ["page"]);
    runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();

    assert_eq!(
        seen.lock().clone(),
        vec!["worker 2/1".to_string(), "test adds an address".to_string()]
    );
}

#[tokio::test]
async fn test_static_values_are_adopted() {
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![
            FixtureDecl::json_value("baseURL", serde_json::json!("https://shop.local")).option(),
            FixtureDecl::factory("home", |params, use_fn, _| async move {
                let base = params
                    .require::<serde_json::Value>("baseURL")?
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                use_fn.provide(format!("{}/home", base)).await?;
                Ok(())
            })
            .deps(["baseURL"]),
        ]))
        .unwrap();
    let (ctx, _, steps) = context();

    let test = TestFunction::declaring("opens home", ["home", "baseURL"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        params.get::<String>("home").map(String::as_str),
        Some("https://shop.local/home")
    );
    // Options never produce steps.
    assert_eq!(steps.titles(), vec!["fixture: home"]);

    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    assert!(runner.active_fixtures().is_empty());
}

#[tokio::test]
async fn test_override_wraps_parent_value() {
    let events = events();
    let runner = FixtureRunner::new();
    let teardown_log = events.clone();
    runner
        .set_pool(pool(vec![
            tracked("page", &events),
            FixtureDecl::factory("page", move |params, use_fn, _| {
                let events = teardown_log.clone();
                async move {
                    let base = params.require::<String>("page")?.clone();
                    use_fn.provide(format!("{}+logged-in", base)).await?;
                    events.lock().push("teardown override".to_string());
                    Ok(())
                }
            })
            .deps(["page"]),
        ]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("uses page", ["page"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        params.get::<String>("page").map(String::as_str),
        Some("page+logged-in")
    );

    runner.teardown_scope(Scope::Test, ctx.timeouts()).await.unwrap();
    assert_eq!(
        log(&events),
        vec!["setup page", "teardown override", "teardown page"]
    );
}

#[tokio::test]
async fn test_run_function_receives_params_and_reports_errors() {
    let events = events();
    let runner = FixtureRunner::new();
    runner.set_pool(pool(vec![tracked("page", &events)])).unwrap();
    let (ctx, _, _) = context();

    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let test = TestFunction::new("reads page", ["page"], move |params, info| {
        *record.lock() = params
            .get::<String>("page")
            .map(|page| format!("{} in {}", page, info.title));
        async { Ok(()) }
    });
    let outcome = runner
        .resolve_parameters_and_run_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert_eq!(outcome, Invocation::Completed);
    assert_eq!(seen.lock().as_deref(), Some("page in adds an address"));

    let failing = TestFunction::new("asserts", ["page"], |_, _| async {
        anyhow::bail!("expected message to be visible")
    });
    let err = runner
        .resolve_parameters_and_run_function(&failing, &ctx, AutoFixtures::All)
        .await
        .unwrap_err();
    assert!(matches!(err, FixtureError::Function { ref title, .. } if title == "asserts"));
}

#[tokio::test]
async fn test_unknown_fixture_name_is_an_error() {
    let runner = FixtureRunner::new();
    runner.set_pool(pool(vec![FixtureDecl::value("db", ())])).unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("typo", ["dbb"])
        .at(fixturekit_common::Location::new("cart.spec.ts", 3, 1));
    let err = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cart.spec.ts:3:1: fixture \"dbb\" is not declared"
    );
}

#[tokio::test]
async fn test_resolution_without_pool_fails() {
    let runner = FixtureRunner::new();
    let (ctx, _, _) = context();
    let test = TestFunction::declaring("anything", ["db"]);
    let err = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap_err();
    assert!(matches!(err, FixtureError::NoPool));
}

#[tokio::test]
async fn test_factory_without_value_fails_setup() {
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![FixtureDecl::factory("lazy", |_, _use_fn, _| async {
            Ok(())
        })]))
        .unwrap();
    let (ctx, _, steps) = context();

    let test = TestFunction::declaring("uses lazy", ["lazy"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert!(params.is_none());
    assert!(matches!(&ctx.errors()[0], FixtureError::NotProvided(name) if name == "lazy"));

    let records = steps.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].error.as_deref().unwrap().contains("without providing"));
}

#[tokio::test]
async fn test_panicking_factory_fails_setup() {
    let runner = FixtureRunner::new();
    runner
        .set_pool(pool(vec![FixtureDecl::factory("fragile", |_, _, _| async {
            panic!("fragile broke");
        })]))
        .unwrap();
    let (ctx, _, _) = context();

    let test = TestFunction::declaring("uses fragile", ["fragile"]);
    let params = runner
        .resolve_parameters_for_function(&test, &ctx, AutoFixtures::All)
        .await
        .unwrap();
    assert!(params.is_none());
    match &ctx.errors()[0] {
        FixtureError::Panicked { fixture, message } => {
            assert_eq!(fixture, "fragile");
            assert_eq!(message, "fragile broke");
        }
        other => panic!("unexpected error: {}", other),
    }

    let fixture = runner
        .instance(&runner.pool().unwrap().registration("fragile").unwrap().id)
        .unwrap();
    assert_eq!(fixture.state(), FixtureState::Failed);
}
