// Operation dispatch against a scripted brew: argument mapping, exit
// policies, cache-aware refresh and invalidation after mutations
#![cfg(unix)]


use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use taproom::operation::keys;
use taproom::{
    Brew, CacheEntry, DiskCache, ExecutionError, Mode, Operation, PackageKind, Runner, Source,
};
use test_helpers::TestEnvironment;

const INSTALLED_JSON: &str = r#"{"formulae":[{"name":"wget","installed":[{"version":"1.24.5"}]}],"casks":[]}"#;

fn seed_fresh(cache: &DiskCache, key: &str, payload: &Value) {
    cache.save(key, payload);
}

fn seed_stale(cache: &DiskCache, key: &str, payload: &Value) {
    let captured = Utc::now() - ChronoDuration::hours(6);
    cache.save_entry(key, &CacheEntry::captured_at(payload.clone(), captured));
}

fn is_fresh(cache: &DiskCache, key: &str) -> bool {
    cache
        .load::<Value>(key)
        .is_some_and(|entry| entry.is_fresh(Duration::from_secs(3600)))
}

#[tokio::test]
async fn test_perform_decodes_json() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);

    let value: Value = env.brew().perform(&Operation::Installed).await.unwrap();

    assert_eq!(value["formulae"][0]["name"], "wget");
    assert_eq!(env.invocations(), vec!["info --json=v2 --installed"]);
}

#[tokio::test]
async fn test_every_invocation_disables_auto_update() {
    let env = TestEnvironment::new();
    let brew = env.brew();

    brew.perform_text(&Operation::Leaves).await.unwrap();
    brew.stream(&Operation::Update).finish().await.unwrap();

    let log = env.env_log();
    assert_eq!(log.len(), 2);
    for line in log {
        assert_eq!(line, "HOMEBREW_NO_AUTO_UPDATE=1 HOMEBREW_NO_INSTALL_CLEANUP=1");
    }
}

#[tokio::test]
async fn test_perform_rejects_malformed_json() {
    let env = TestEnvironment::new();
    env.respond("outdated", "==> Outdated formulae\nwget\n");

    let err = env.brew().perform::<Value>(&Operation::Outdated).await.unwrap_err();

    match err {
        ExecutionError::DecodeFailure { context } => assert!(context.contains("outdated")),
        other => panic!("expected DecodeFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_strict_operation_fails_on_non_zero() {
    let env = TestEnvironment::new();
    env.respond_with("search", "", "Error: No formulae or casks found for \"nope\".\n", 1);

    let err = env
        .brew()
        .perform_text(&Operation::Search { query: "nope".into() })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExecutionError::NonZeroExit {
            code: 1,
            stderr: "Error: No formulae or casks found for \"nope\".\n".to_string()
        }
    );
}

#[tokio::test]
async fn test_doctor_warnings_are_findings() {
    let env = TestEnvironment::new();
    env.respond_with(
        "doctor",
        "",
        "Warning: Some installed formulae are deprecated or disabled.\n",
        1,
    );

    let result = env.brew().perform_result(&Operation::Doctor).await.unwrap();

    assert_eq!(result.status, 1);
    assert!(result.stderr.starts_with("Warning:"));
}

#[tokio::test]
async fn test_bundle_check_reports_missing() {
    let env = TestEnvironment::new();
    env.respond_with(
        "bundle-check",
        "brew bundle can't satisfy your Brewfile's dependencies.\n",
        "",
        1,
    );
    let op = Operation::BundleCheck {
        file: PathBuf::from("/tmp/Brewfile"),
    };

    let result = env.brew().perform_result(&op).await.unwrap();

    assert!(!result.success());
    assert!(result.stdout.contains("can't satisfy"));
    assert_eq!(env.invocations(), vec!["bundle check --file=/tmp/Brewfile"]);
}

#[tokio::test]
async fn test_missing_brew_is_not_found() {
    let env = TestEnvironment::new();
    let brew = Brew::with_parts(Runner::new("/nonexistent/brew"), env.disk_cache());

    assert!(!brew.is_available().await);
    assert!(brew.perform_text(&Operation::Leaves).await.unwrap_err().is_not_found());

    let mut stream = brew.stream(&Operation::Update);
    assert!(matches!(
        stream.next().await,
        Some(Err(ExecutionError::NotFound { .. }))
    ));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_is_available() {
    let env = TestEnvironment::new();
    env.respond("--version", "Homebrew 4.4.0\n");

    assert!(env.brew().is_available().await);
}

#[tokio::test]
async fn test_refresh_fetches_then_serves_cache() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    let brew = env.brew();

    let first = brew.refresh(&Operation::Installed, Value::Null, false).await.unwrap();
    assert_eq!(first.source, Source::Fetched);
    assert_eq!(first.value["formulae"][0]["name"], "wget");

    let second = brew.refresh(&Operation::Installed, Value::Null, false).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.value, first.value);
    assert!(second.captured_at.is_some());

    assert_eq!(env.invocations().len(), 1);
}

#[tokio::test]
async fn test_refresh_force_bypasses_fresh_cache() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    let brew = env.brew();
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": [], "casks": []}));

    let refreshed = brew.refresh(&Operation::Installed, Value::Null, true).await.unwrap();

    assert_eq!(refreshed.source, Source::Fetched);
    assert_eq!(refreshed.value["formulae"][0]["name"], "wget");
    assert_eq!(env.invocations().len(), 1);
}

#[tokio::test]
async fn test_refresh_stale_entry_triggers_fetch() {
    let env = TestEnvironment::new();
    env.respond("leaves", "wget\njq\n");
    let brew = env.brew();
    brew.cache().save_entry(
        keys::LEAVES,
        &CacheEntry::captured_at("wget\n".to_string(), Utc::now() - ChronoDuration::hours(1)),
    );

    let refreshed = brew.refresh_text(&Operation::Leaves, String::new(), false).await.unwrap();

    assert_eq!(refreshed.source, Source::Fetched);
    assert_eq!(refreshed.value, "wget\njq\n");
    assert!(is_fresh(brew.cache(), keys::LEAVES));
}

#[tokio::test]
async fn test_refresh_falls_back_to_last_known_value() {
    let env = TestEnvironment::new();
    env.respond_with("info", "", "Error: Permission denied\n", 1);
    let brew = env.brew();
    let cached = json!({"formulae": [{"name": "jq"}], "casks": []});
    seed_stale(brew.cache(), keys::INSTALLED, &cached);

    let refreshed = brew.refresh(&Operation::Installed, Value::Null, false).await.unwrap();

    assert_eq!(refreshed.value, cached);
    assert_eq!(
        refreshed.source,
        Source::Fallback(ExecutionError::NonZeroExit {
            code: 1,
            stderr: "Error: Permission denied\n".to_string()
        })
    );
}

#[tokio::test]
async fn test_refresh_without_fallback_propagates_error() {
    let env = TestEnvironment::new();
    env.respond_with("info", "", "Error: Permission denied\n", 1);

    let err = env
        .brew()
        .refresh(&Operation::Installed, Value::Null, false)
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(1));
}

#[tokio::test]
async fn test_refresh_uncached_operation_always_fetches() {
    let env = TestEnvironment::new();
    env.respond("config", "HOMEBREW_VERSION: 4.4.0\n");
    let brew = env.brew();

    for _ in 0..2 {
        let refreshed = brew.refresh_text(&Operation::Config, String::new(), false).await.unwrap();
        assert_eq!(refreshed.source, Source::Fetched);
    }
    assert_eq!(env.invocations().len(), 2);
    assert!(!env.cache.exists());
}

#[tokio::test]
async fn test_buffered_mutation_marks_keys_stale() {
    let env = TestEnvironment::new();
    let brew = env.brew();
    let services = json!([{"name": "redis", "status": "none"}]);
    seed_fresh(brew.cache(), keys::SERVICES, &services);
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": []}));

    brew.perform_text(&Operation::StartService { name: "redis".into() })
        .await
        .unwrap();

    assert!(!is_fresh(brew.cache(), keys::SERVICES));
    assert!(is_fresh(brew.cache(), keys::INSTALLED));
    // The payload survives as a fallback
    assert_eq!(brew.cache().load::<Value>(keys::SERVICES).unwrap().payload, services);
    assert_eq!(env.invocations(), vec!["services start redis"]);
}

#[tokio::test]
async fn test_failed_mutation_keeps_cache_fresh() {
    let env = TestEnvironment::new();
    env.respond_with("pin", "", "Error: wget not installed\n", 1);
    let brew = env.brew();
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": []}));

    let result = brew.perform_text(&Operation::Pin { name: "wget".into() }).await;

    assert!(result.is_err());
    assert!(is_fresh(brew.cache(), keys::INSTALLED));
}

#[tokio::test]
async fn test_streamed_install_invalidates_after_success() {
    let env = TestEnvironment::new();
    env.respond("install", "==> Fetching wget\n==> Pouring wget--1.24.5.bottle.tar.gz\n");
    let brew = env.brew();
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": []}));
    seed_fresh(brew.cache(), keys::OUTDATED, &json!({"formulae": []}));

    let op = Operation::Install {
        names: vec!["wget".into()],
        kind: PackageKind::Formula,
    };
    let lines: Vec<String> = brew
        .stream(&op)
        .lines()
        .map(|line| line.unwrap())
        .collect()
        .await;

    assert_eq!(
        lines,
        vec!["==> Fetching wget", "==> Pouring wget--1.24.5.bottle.tar.gz"]
    );
    assert!(!is_fresh(brew.cache(), keys::INSTALLED));
    assert!(!is_fresh(brew.cache(), keys::OUTDATED));
    assert_eq!(env.invocations(), vec!["install --formula wget"]);
}

#[tokio::test]
async fn test_streamed_failure_reports_stderr_and_keeps_cache() {
    let env = TestEnvironment::new();
    env.respond_with(
        "install",
        "==> Fetching nope\n",
        "Error: No available formula with the name \"nope\".\n",
        1,
    );
    let brew = env.brew();
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": []}));

    let op = Operation::Install {
        names: vec!["nope".into()],
        kind: PackageKind::Formula,
    };
    let err = brew.stream(&op).finish().await.unwrap_err();

    assert_eq!(
        err,
        ExecutionError::NonZeroExit {
            code: 1,
            stderr: "Error: No available formula with the name \"nope\".\n".to_string()
        }
    );
    assert!(is_fresh(brew.cache(), keys::INSTALLED));
}

#[tokio::test]
async fn test_concurrent_reads_share_one_cache() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    env.respond("services-list", r#"[{"name":"postgresql@16","status":"started"}]"#);
    let brew = env.brew();

    let (installed, services) = tokio::join!(
        brew.refresh(&Operation::Installed, Value::Null, false),
        brew.refresh(&Operation::Services, Vec::<Value>::new(), false),
    );

    assert_eq!(installed.unwrap().source, Source::Fetched);
    assert_eq!(services.unwrap().value.len(), 1);
    assert!(is_fresh(brew.cache(), keys::INSTALLED));
    assert!(is_fresh(brew.cache(), keys::SERVICES));
}

fn install_wget() -> Operation {
    Operation::Install {
        names: vec!["wget".into()],
        kind: PackageKind::Formula,
    }
}

#[tokio::test]
async fn test_streaming_operation_cannot_run_buffered() {
    let env = TestEnvironment::new();
    env.respond("install", "==> Pouring wget\n");
    let brew = env.brew();

    let err = brew.perform_text(&install_wget()).await.unwrap_err();

    assert_eq!(
        err,
        ExecutionError::ModeMismatch {
            operation: "install",
            declared: Mode::Streaming,
            requested: Mode::Raw,
        }
    );
    assert!(brew.perform_result(&install_wget()).await.is_err());
    assert!(env.invocations().is_empty());
}

#[tokio::test]
async fn test_plain_text_operation_cannot_be_decoded() {
    let env = TestEnvironment::new();
    env.respond("leaves", "wget\njq\n");
    let brew = env.brew();

    let err = brew
        .refresh::<Value>(&Operation::Leaves, Value::Null, false)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ExecutionError::ModeMismatch {
            operation: "leaves",
            declared: Mode::Raw,
            requested: Mode::Decoded,
        }
    );

    assert!(matches!(
        brew.perform::<Value>(&Operation::Leaves).await,
        Err(ExecutionError::ModeMismatch { .. })
    ));
    assert!(env.invocations().is_empty());
    assert!(!env.cache.exists());
}

#[tokio::test]
async fn test_json_operation_cannot_be_cached_as_text() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    let brew = env.brew();

    let err = brew
        .refresh_text(&Operation::Installed, String::new(), false)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ExecutionError::ModeMismatch {
            operation: "installed",
            declared: Mode::Decoded,
            requested: Mode::Raw,
        }
    );
    assert!(brew.cache().load::<Value>(keys::INSTALLED).is_none());
}

#[tokio::test]
async fn test_json_operation_readable_as_text() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);

    let text = env.brew().perform_text(&Operation::Installed).await.unwrap();

    assert_eq!(text, INSTALLED_JSON);
}

#[tokio::test]
async fn test_buffered_operation_cannot_stream() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    let brew = env.brew();

    let items: Vec<_> = brew.stream(&Operation::Installed).collect().await;

    assert_eq!(
        items,
        vec![Err(ExecutionError::ModeMismatch {
            operation: "installed",
            declared: Mode::Decoded,
            requested: Mode::Streaming,
        })]
    );
    assert!(env.invocations().is_empty());
    assert!(!env.cache.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_end_follows_invalidation() {
    let env = TestEnvironment::new();
    env.respond("upgrade", "==> Upgrading 1 outdated package\n");
    let brew = env.brew();
    seed_fresh(brew.cache(), keys::INSTALLED, &json!({"formulae": []}));
    seed_fresh(brew.cache(), keys::OUTDATED, &json!({"formulae": []}));

    let mut stream = brew.stream(&Operation::Upgrade { names: vec![] });
    while let Some(item) = stream.next().await {
        item.unwrap();
    }

    // No waiting: the cache is already updated when the stream reports its end
    assert!(!is_fresh(brew.cache(), keys::INSTALLED));
    assert!(!is_fresh(brew.cache(), keys::OUTDATED));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_fetched_value_reports_capture_time() {
    let env = TestEnvironment::new();
    env.respond("info", INSTALLED_JSON);
    let brew = env.brew();
    let before = Utc::now();

    let fetched = brew.refresh(&Operation::Installed, Value::Null, false).await.unwrap();

    assert_eq!(fetched.source, Source::Fetched);
    let captured_at = fetched.captured_at.expect("fetched value should carry its capture time");
    assert!(captured_at >= before);

    let stored = brew.cache().load::<Value>(keys::INSTALLED).unwrap();
    assert_eq!(stored.captured_at, captured_at);

    let cached = brew.refresh(&Operation::Installed, Value::Null, false).await.unwrap();
    assert_eq!(cached.source, Source::Cache);
    assert_eq!(cached.captured_at, Some(captured_at));
}
