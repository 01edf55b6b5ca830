use std::sync::{Arc, Mutex};

use sl_core::error::{FetchError, LoaderError};
use sl_core::{
    CodeBlock, Delivery, Environment, LoaderConfig, Loader, MemoryHost, Phase, UnitContext,
    VirtualPath,
};

type Log = Arc<Mutex<Vec<String>>>;

fn key(s: &str) -> VirtualPath {
    s.parse().unwrap()
}

fn config(environment: Environment) -> LoaderConfig {
    LoaderConfig::new(environment).with_cache_bust(false)
}

/// Declares `imports` and one block that appends `name` to `log`.
fn unit(
    log: &Log,
    name: &'static str,
    imports: &'static [&'static str],
) -> impl Fn(&UnitContext) -> Result<(), FetchError> + Send + Sync + 'static {
    let log = log.clone();
    move |cx: &UnitContext| {
        for reference in imports {
            cx.import(reference)?;
        }
        let log = log.clone();
        cx.code(CodeBlock::new(format!("function(){{{}}}", name), move |_| {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        }))?;
        Ok(())
    }
}

fn diamond(log: &Log) -> MemoryHost {
    MemoryHost::new()
        .unit("/main.js", unit(log, "main", &["./a.js", "./b.js"]))
        .unit("/a.js", unit(log, "a", &["./shared.js"]))
        .unit("/b.js", unit(log, "b", &["./shared.js"]))
        .unit("/shared.js", unit(log, "shared", &[]))
}

#[tokio::test]
async fn foreground_load_runs_dependencies_first() {
    let log: Log = Arc::default();
    let host = diamond(&log).with_delivery(Delivery::Deferred);
    let mut loader = Loader::new(config(Environment::Foreground), host);

    let ready = Arc::new(Mutex::new(false));
    let flag = ready.clone();
    loader.on_ready(move || *flag.lock().unwrap() = true);

    let report = loader.load("main.js").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["shared", "a", "b", "main"]);
    assert_eq!(report.blocks_run, 4);
    assert!(*ready.lock().unwrap());
    assert_eq!(loader.session().phase(), Phase::Executed);

    let fetched: Vec<_> = loader.host().requests().into_iter().map(|r| r.key).collect();
    assert_eq!(
        fetched,
        vec![key("/main.js"), key("/a.js"), key("/shared.js"), key("/b.js")]
    );
}

#[test]
fn background_load_matches_foreground() {
    let log: Log = Arc::default();
    let mut loader = Loader::new(config(Environment::Background), diamond(&log));

    let report = loader.load_blocking("/main.js").unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["shared", "a", "b", "main"]);
    assert_eq!(
        report.order,
        vec![key("/shared.js"), key("/a.js"), key("/b.js"), key("/main.js")]
    );
    assert_eq!(loader.session().tree().len(), 4);
}

#[test]
fn blocking_load_rejects_deferred_host() {
    let log: Log = Arc::default();
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let _guard = runtime.enter();
    let host = diamond(&log).with_delivery(Delivery::Deferred);
    let mut loader = Loader::new(config(Environment::Background), host);

    let err = loader.load_blocking("/main.js").unwrap_err();
    assert!(matches!(
        err,
        LoaderError::FetchFailure {
            source: FetchError::Incomplete,
            ..
        }
    ));
}

#[tokio::test]
async fn failure_deep_in_tree_aborts_session() {
    let log: Log = Arc::default();
    let host = MemoryHost::new()
        .with_delivery(Delivery::Deferred)
        .unit("/main.js", unit(&log, "main", &["./a.js"]))
        .unit("/a.js", unit(&log, "a", &["./lib/missing.js"]));
    let mut loader = Loader::new(config(Environment::Foreground), host);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    loader.on_error(move |err| sink.lock().unwrap().push(err.to_string()));
    let ready = Arc::new(Mutex::new(false));
    let flag = ready.clone();
    loader.on_ready(move || *flag.lock().unwrap() = true);

    let err = loader.load("/main.js").await.unwrap_err();

    assert_eq!(err.failing_key(), Some(&key("/lib/missing.js")));
    assert!(log.lock().unwrap().is_empty());
    assert!(!*ready.lock().unwrap());
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(loader.session().phase(), Phase::Failed);
}

#[tokio::test]
async fn background_only_block_is_skipped_in_foreground() {
    let log: Log = Arc::default();
    let worker_log = log.clone();
    let host = diamond(&log)
        .with_delivery(Delivery::Deferred)
        .unit("/b.js", move |cx| {
            cx.import("./shared.js")?;
            let first = worker_log.clone();
            cx.code(CodeBlock::new("function(){b}", move |_| {
                first.lock().unwrap().push("b".to_string());
                Ok(())
            }))?;
            let worker = worker_log.clone();
            cx.code(
                CodeBlock::new("function(){b worker}", move |_| {
                    worker.lock().unwrap().push("b worker".to_string());
                    Ok(())
                })
                .in_environments([Environment::Background]),
            )?;
            Ok(())
        });
    let mut loader = Loader::new(config(Environment::Foreground), host);

    let report = loader.load("/main.js").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["shared", "a", "b", "main"]);
    assert_eq!(report.blocks_run, 4);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].unit, key("/b.js"));
    assert_eq!(report.skipped[0].index, 1);
}

#[test]
fn host_failure_message_is_reported() {
    let host = MemoryHost::new()
        .unit("/main.js", |cx| {
            cx.import("./bad.js")?;
            Ok(())
        })
        .failing("/bad.js", "syntax error");
    let mut loader = Loader::new(config(Environment::Background), host);

    let err = loader.load_blocking("/main.js").unwrap_err();
    assert_eq!(err.to_string(), "failed to load unit /bad.js: syntax error");
}

#[test]
fn export_bundle_contains_shared_once() {
    let log: Log = Arc::default();
    let mut loader = Loader::new(config(Environment::Background), diamond(&log));

    let bundle = loader.export_blocking("/main.js").unwrap();

    assert!(log.lock().unwrap().is_empty());
    assert!(bundle.code.starts_with("SL={};SL.ENVIRONMENT=\"background\";SL.GLOBAL=self;"));
    assert_eq!(bundle.code.matches("(function(){shared}());").count(), 1);
    assert_eq!(bundle.code.matches("/* /shared.js */").count(), 1);
    assert_eq!(loader.session().phase(), Phase::Exported);
}

#[tokio::test]
async fn stray_declarations_after_completion_are_rejected() {
    let stray: Arc<Mutex<Option<UnitContext>>> = Arc::default();
    let keep = stray.clone();
    let host = MemoryHost::new().unit("/main.js", move |cx| {
        *keep.lock().unwrap() = Some(cx.clone());
        Ok(())
    });
    let mut loader = Loader::new(config(Environment::Foreground), host);
    loader.load("/main.js").await.unwrap();

    let cx = stray.lock().unwrap().take().unwrap();
    assert!(matches!(
        cx.import("./late.js"),
        Err(LoaderError::DeclarationOutsideContext { .. })
    ));
}

#[tokio::test]
async fn ready_after_completion_runs_immediately() {
    let host = MemoryHost::new().unit("/main.js", |_| Ok(()));
    let mut loader = Loader::new(config(Environment::Foreground), host);
    loader.load("/main.js").await.unwrap();

    let ready = Arc::new(Mutex::new(false));
    let flag = ready.clone();
    loader.on_ready(move || *flag.lock().unwrap() = true);
    assert!(*ready.lock().unwrap());
}

#[tokio::test]
async fn second_load_on_same_loader_is_rejected() {
    let host = MemoryHost::new().unit("/main.js", |_| Ok(()));
    let mut loader = Loader::new(config(Environment::Foreground), host);
    loader.load("/main.js").await.unwrap();
    assert!(matches!(
        loader.load("/main.js").await,
        Err(LoaderError::InvalidPhase { .. })
    ));
}

#[test]
fn cache_bust_never_changes_keys() {
    let host = MemoryHost::new()
        .unit("/main.js", |cx| {
            cx.import("./a.js")?;
            Ok(())
        })
        .unit("/a.js", |_| Ok(()));
    let mut loader = Loader::new(LoaderConfig::new(Environment::Background), host);
    loader.load_blocking("/main.js").unwrap();

    let requests = loader.host().requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert!(request.location.starts_with(&format!("{}?_sl_t", request.key)));
    }
}
