//! Integration tests for the action broker.
//!
//! Each test writes small `/bin/sh` action programs and their manifests into
//! a temporary actions directory and drives them through a real
//! `ProcessInvoker` (direct launch, no escalation helper).
//!
//! Run with: cargo test --package plinth-runtime --test broker

use async_trait::async_trait;
use chrono::Utc;
use plinth_audit::{AuditFilter, AuditLogger, AuditOutcome};
use plinth_core::{
    ActionSpec, ArgumentSpec, ArgumentType, AuditConfig, BrokerConfig, EscalationMethod,
    PlinthConfig, ResponseFormat,
};
use plinth_runtime::codec;
use plinth_runtime::invoker::SAFE_PATH;
use plinth_runtime::{
    ActionBroker, BrokerError, Invocation, InvocationOutput, Invoker, LaunchError, ProcessInvoker,
    Registry, StartupError,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    actions: PathBuf,
    audit: PathBuf,
    scratch: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let actions = root.path().join("actions");
        let audit = root.path().join("audit");
        let scratch = root.path().join("scratch");
        for dir in [&actions, &audit, &scratch] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            actions,
            audit,
            scratch,
        }
    }

    /// Install an action program and its manifest.
    fn action(&self, name: &str, manifest_extra: &str, script: &str) {
        let program = self.actions.join(name);
        fs::write(&program, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(
            self.actions.join(format!("{name}.yaml")),
            format!("name: {name}\nprivileged: false\n{manifest_extra}"),
        )
        .unwrap();
    }

    fn scratch(&self, file: &str) -> PathBuf {
        self.scratch.join(file)
    }

    fn logger(&self) -> AuditLogger {
        AuditLogger::open(AuditConfig {
            enabled: true,
            stdout: false,
            directory: self.audit.clone(),
            file_name: "audit.log".to_string(),
        })
        .unwrap()
    }

    fn broker(&self) -> ActionBroker {
        self.broker_with(BrokerConfig {
            kill_grace_ms: 300,
            ..Default::default()
        })
    }

    fn broker_with(&self, config: BrokerConfig) -> ActionBroker {
        let registry = Registry::load(&self.actions, &config).unwrap();
        ActionBroker::new(
            registry,
            Arc::new(ProcessInvoker::direct(&config)),
            Arc::new(self.logger()),
            config,
        )
    }
}

fn args(value: Value) -> BTreeMap<String, Value> {
    serde_json::from_value(value).unwrap()
}

async fn outcomes(broker: &ActionBroker) -> Vec<(String, AuditOutcome)> {
    broker
        .audit()
        .query(AuditFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.action_name, r.outcome))
        .collect()
}

fn process_exists(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Invoker that counts launches and never spawns anything.
#[derive(Default)]
struct CountingInvoker {
    launches: AtomicUsize,
}

#[async_trait]
impl Invoker for CountingInvoker {
    async fn execute(&self, _invocation: Invocation<'_>) -> Result<InvocationOutput, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(InvocationOutput {
            exit_status: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            timed_out: false,
            started_at: now,
            finished_at: now,
        })
    }
}

fn counting_broker() -> (ActionBroker, Arc<CountingInvoker>) {
    let spec = ActionSpec {
        name: "pagekite-set-kite".to_string(),
        description: None,
        executable_path: "/bin/true".into(),
        argument_schema: vec![
            ArgumentSpec::new("kite_name", ArgumentType::String)
                .with_pattern(plinth_core::ArgumentPattern::new("[A-Za-z0-9.-]+").unwrap()),
        ],
        timeout: Duration::from_secs(5),
        privileged: true,
        exclusive: true,
        response: ResponseFormat::Auto,
    };
    let invoker = Arc::new(CountingInvoker::default());
    let broker = ActionBroker::new(
        Registry::from_specs(vec![spec]),
        invoker.clone(),
        Arc::new(AuditLogger::disabled()),
        BrokerConfig::default(),
    );
    (broker, invoker)
}

// =============================================================================
// Rejection before dispatch
// =============================================================================

#[tokio::test]
async fn test_unknown_action_spawns_nothing() {
    let (broker, invoker) = counting_broker();

    let result = broker.submit("reboot", BTreeMap::new()).await;
    assert!(matches!(result, Err(BrokerError::UnknownAction(ref n)) if n == "reboot"));
    assert_eq!(invoker.launches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_arguments_spawn_nothing() {
    let (broker, invoker) = counting_broker();

    for bad in [
        json!({}),
        json!({"kite_name": "x; rm -rf /"}),
        json!({"kite_name": 7}),
        json!({"kite_name": "ok", "extra": true}),
    ] {
        let result = broker.submit("pagekite-set-kite", args(bad)).await;
        assert!(matches!(result, Err(BrokerError::InvalidArguments(_))));
    }
    assert_eq!(invoker.launches.load(Ordering::SeqCst), 0);

    broker
        .submit("pagekite-set-kite", args(json!({"kite_name": "mybox.pagekite.me"})))
        .await
        .unwrap();
    assert_eq!(invoker.launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_validate_is_dry_and_idempotent() {
    let (broker, invoker) = counting_broker();
    let good = args(json!({"kite_name": "mybox"}));
    let bad = args(json!({"kite_name": "my box"}));

    for _ in 0..3 {
        assert!(broker.validate("pagekite-set-kite", &good).is_ok());
        assert!(matches!(
            broker.validate("pagekite-set-kite", &bad),
            Err(BrokerError::InvalidArguments(_))
        ));
    }
    assert!(matches!(
        broker.validate("nope", &good),
        Err(BrokerError::UnknownAction(_))
    ));
    assert_eq!(invoker.launches.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_request_arrives_on_stdin_with_scrubbed_environment() {
    let fx = Fixture::new();
    let stdin_copy = fx.scratch("stdin.bin");
    let env_copy = fx.scratch("env.txt");
    let argc = fx.scratch("argc.txt");
    fx.action(
        "pagekite-set-kite",
        "arguments:\n  - {name: kite_name, type: string}\n  - {name: note, type: string, required: false}\n",
        &format!(
            "cat > {}\nenv > {}\necho \"$#\" > {}\n",
            stdin_copy.display(),
            env_copy.display(),
            argc.display()
        ),
    );
    let broker = fx.broker();

    let arguments = args(json!({
        "kite_name": "mybox.pagekite.me",
        "note": "$(touch /tmp/plinth-pwned); `id` | tee"
    }));
    let result = broker
        .submit("pagekite-set-kite", arguments.clone())
        .await
        .unwrap();
    assert_eq!(result.exit_status, 0);
    assert!(result.decoded_payload.is_none());

    let request = codec::decode_request(&fs::read(&stdin_copy).unwrap()).unwrap();
    assert_eq!(request.name, "pagekite-set-kite");
    assert_eq!(request.arguments, arguments);

    let env = fs::read_to_string(&env_copy).unwrap();
    assert!(env.contains(&format!("PATH={SAFE_PATH}")));
    assert!(env.contains("PLINTH_ACTION=pagekite-set-kite"));
    assert!(!env.contains("CARGO"));

    assert_eq!(fs::read_to_string(&argc).unwrap().trim(), "0");
}

#[tokio::test]
async fn test_nonzero_exit_is_a_result() {
    let fx = Fixture::new();
    fx.action(
        "pagekite-start",
        "",
        "echo 'pagekite is not configured' >&2\nexit 3",
    );
    let broker = fx.broker();

    let result = broker.submit("pagekite-start", BTreeMap::new()).await.unwrap();
    assert_eq!(result.exit_status, 3);
    assert!(!result.success());
    assert!(result.stderr_lossy().contains("not configured"));

    assert_eq!(
        outcomes(&broker).await,
        vec![("pagekite-start".to_string(), AuditOutcome::Completed)]
    );
}

#[tokio::test]
async fn test_plain_text_output_passes_through() {
    let fx = Fixture::new();
    fx.action("pagekite-status", "", "echo enabled");
    let broker = fx.broker();

    let result = broker.submit("pagekite-status", BTreeMap::new()).await.unwrap();
    assert!(result.success());
    assert_eq!(result.stdout_lossy(), "enabled\n");
    assert!(result.decoded_payload.is_none());
}

#[tokio::test]
async fn test_response_frame_is_decoded() {
    let fx = Fixture::new();
    let payload = json!({"kite_name": "mybox.pagekite.me", "services": ["http", "ssh"]});
    let frame = fx.scratch("response.bin");
    fs::write(&frame, codec::encode_response(&payload).unwrap()).unwrap();
    fx.action(
        "pagekite-get-kite",
        "",
        &format!("cat > /dev/null\ncat {}", frame.display()),
    );
    let broker = fx.broker();

    let result = broker.submit("pagekite-get-kite", BTreeMap::new()).await.unwrap();
    assert_eq!(result.decoded_payload, Some(payload));
}

#[tokio::test]
async fn test_corrupt_response_frame_fails_with_output() {
    let fx = Fixture::new();
    // Echoing the request back produces a request-kind frame.
    fx.action("echo-back", "", "cat");
    let broker = fx.broker();

    let error = broker.submit("echo-back", BTreeMap::new()).await.unwrap_err();
    match &error {
        BrokerError::Decode { result, .. } => {
            assert_eq!(result.exit_status, 0);
            assert!(codec::looks_like_frame(&result.stdout));
        }
        other => panic!("expected decode error, got {other:?}"),
    }
    assert!(error.result().is_some());

    assert_eq!(
        outcomes(&broker).await,
        vec![("echo-back".to_string(), AuditOutcome::Failed)]
    );
}

#[tokio::test]
async fn test_frame_mode_rejects_plain_text() {
    let fx = Fixture::new();
    fx.action("pagekite-get-kite", "response: frame\n", "echo mybox.pagekite.me");
    let broker = fx.broker();

    let error = broker.submit("pagekite-get-kite", BTreeMap::new()).await.unwrap_err();
    match &error {
        BrokerError::Decode { result, .. } => {
            assert_eq!(result.stdout_lossy(), "mybox.pagekite.me\n");
            assert!(result.decoded_payload.is_none());
        }
        other => panic!("expected decode error, got {other:?}"),
    }

    assert_eq!(
        outcomes(&broker).await,
        vec![("pagekite-get-kite".to_string(), AuditOutcome::Failed)]
    );
}

#[tokio::test]
async fn test_output_is_capped() {
    let fx = Fixture::new();
    fx.action(
        "noisy",
        "",
        "i=0\nwhile [ $i -lt 100 ]; do echo 0123456789; i=$((i+1)); done",
    );
    let broker = fx.broker_with(BrokerConfig {
        max_output_bytes: 64,
        ..Default::default()
    });

    let result = broker.submit("noisy", BTreeMap::new()).await.unwrap();
    assert_eq!(result.exit_status, 0);
    assert_eq!(result.stdout.len(), 64);
    assert!(result.stdout_truncated);
    assert!(!result.stderr_truncated);
}

#[tokio::test]
async fn test_missing_executable_is_launch_failure() {
    let fx = Fixture::new();
    fx.action("vanishing", "", "exit 0");
    let broker = fx.broker();
    fs::remove_file(fx.actions.join("vanishing")).unwrap();

    let result = broker.submit("vanishing", BTreeMap::new()).await;
    assert!(matches!(
        result,
        Err(BrokerError::LaunchFailure {
            source: LaunchError::Spawn { .. },
            ..
        })
    ));
    assert_eq!(
        outcomes(&broker).await,
        vec![("vanishing".to_string(), AuditOutcome::Failed)]
    );
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_timeout_kills_the_program() {
    let fx = Fixture::new();
    let pid_file = fx.scratch("pid");
    fx.action(
        "hang",
        "timeout_secs: 1\n",
        &format!("echo started\necho $$ > {}\nexec sleep 5", pid_file.display()),
    );
    let broker = fx.broker();

    let begin = Instant::now();
    let error = broker.submit("hang", BTreeMap::new()).await.unwrap_err();
    assert!(begin.elapsed() < Duration::from_secs(4));

    let BrokerError::TimedOut(result) = error else {
        panic!("expected timeout");
    };
    assert!(result.timed_out);
    assert_eq!(result.exit_status, 128 + libc::SIGTERM);
    assert_eq!(result.stdout_lossy(), "started\n");

    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(!process_exists(pid));

    assert_eq!(
        outcomes(&broker).await,
        vec![("hang".to_string(), AuditOutcome::TimedOut)]
    );
}

#[tokio::test]
async fn test_timeout_escalates_to_sigkill() {
    let fx = Fixture::new();
    let pid_file = fx.scratch("pid");
    fx.action(
        "stubborn",
        "timeout_secs: 1\n",
        &format!("trap '' TERM\necho $$ > {}\nexec sleep 5", pid_file.display()),
    );
    let broker = fx.broker();

    let error = broker.submit("stubborn", BTreeMap::new()).await.unwrap_err();
    let result = error.result().unwrap();
    assert!(result.timed_out);
    assert_eq!(result.exit_status, 128 + libc::SIGKILL);

    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(!process_exists(pid));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_actions_run_in_parallel() {
    let fx = Fixture::new();
    fx.action("slow-a", "", "echo alpha\nsleep 1\necho alpha-err >&2");
    fx.action("slow-b", "", "echo bravo\nsleep 1\necho bravo-err >&2");
    let broker = fx.broker();

    let begin = Instant::now();
    let (a, b) = tokio::join!(
        broker.submit("slow-a", BTreeMap::new()),
        broker.submit("slow-b", BTreeMap::new())
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(begin.elapsed() < Duration::from_millis(1900));

    assert_eq!(a.stdout_lossy(), "alpha\n");
    assert_eq!(a.stderr_lossy(), "alpha-err\n");
    assert_eq!(b.stdout_lossy(), "bravo\n");
    assert_eq!(b.stderr_lossy(), "bravo-err\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_action_is_serialized() {
    let fx = Fixture::new();
    fx.action("firewall-reload", "", "sleep 1");
    let broker = fx.broker();

    let (a, b) = tokio::join!(
        broker.submit("firewall-reload", BTreeMap::new()),
        broker.submit("firewall-reload", BTreeMap::new())
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    let (first, second) = if a.started_at <= b.started_at { (a, b) } else { (b, a) };
    assert!(first.finished_at <= second.started_at);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_exclusive_action_overlaps() {
    let fx = Fixture::new();
    fx.action("status", "exclusive: false\n", "sleep 1");
    let broker = fx.broker();

    let begin = Instant::now();
    let (a, b) = tokio::join!(
        broker.submit("status", BTreeMap::new()),
        broker.submit("status", BTreeMap::new())
    );
    a.unwrap();
    b.unwrap();
    assert!(begin.elapsed() < Duration::from_millis(1900));
}

// =============================================================================
// Audit
// =============================================================================

#[tokio::test]
async fn test_every_outcome_is_audited_once() {
    let fx = Fixture::new();
    fx.action(
        "set-hostname",
        "timeout_secs: 1\narguments:\n  - {name: hostname, type: string, pattern: '[a-z0-9-]+'}\n",
        "cat > /dev/null\nexit 0",
    );
    fx.action("hang", "timeout_secs: 1\n", "exec sleep 5");
    fx.action("echo-back", "", "cat");
    let broker = fx.broker();

    broker
        .submit("set-hostname", args(json!({"hostname": "freedombox"})))
        .await
        .unwrap();
    broker
        .submit("set-hostname", args(json!({"hostname": "Not Valid"})))
        .await
        .unwrap_err();
    broker.submit("unknown", BTreeMap::new()).await.unwrap_err();
    broker.submit("hang", BTreeMap::new()).await.unwrap_err();
    broker.submit("echo-back", BTreeMap::new()).await.unwrap_err();

    let records = broker.audit().query(AuditFilter::default()).await.unwrap();
    let got: Vec<_> = records
        .iter()
        .map(|r| (r.action_name.as_str(), r.outcome))
        .collect();
    assert_eq!(
        got,
        vec![
            ("set-hostname", AuditOutcome::Completed),
            ("set-hostname", AuditOutcome::Rejected),
            ("unknown", AuditOutcome::Rejected),
            ("hang", AuditOutcome::TimedOut),
            ("echo-back", AuditOutcome::Failed),
        ]
    );
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(records[0].exit_status, Some(0));
    assert!(records[1].reason.is_some());

    // Raw argument values never reach the log.
    let raw = fs::read_to_string(fx.audit.join("audit.log")).unwrap();
    assert!(!raw.contains("freedombox"));
}

#[tokio::test]
async fn test_audit_failure_overrides_success() {
    let fx = Fixture::new();
    fx.action("pagekite-start", "", "echo ok");
    let broker = fx.broker();
    broker.audit().close().await.unwrap();

    let error = broker.submit("pagekite-start", BTreeMap::new()).await.unwrap_err();
    match error {
        BrokerError::AuditWriteFailure { result, .. } => {
            let result = result.expect("result is carried");
            assert_eq!(result.stdout_lossy(), "ok\n");
        }
        other => panic!("expected audit failure, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_submit_still_runs_and_audits() {
    let fx = Fixture::new();
    let marker = fx.scratch("applied");
    fx.action(
        "pagekite-set-kite",
        "",
        &format!("sleep 1\ntouch {}", marker.display()),
    );
    let broker = fx.broker();

    let caller = broker.submit("pagekite-set-kite", BTreeMap::new());
    assert!(
        tokio::time::timeout(Duration::from_millis(200), caller)
            .await
            .is_err()
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while outcomes(&broker).await.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(marker.exists(), "program was killed with its caller");
    assert_eq!(
        outcomes(&broker).await,
        vec![("pagekite-set-kite".to_string(), AuditOutcome::Completed)]
    );
}

#[test]
fn test_broker_refuses_disabled_audit() {
    let fx = Fixture::new();
    fx.action("pagekite-start", "", "exit 0");
    let mut config = PlinthConfig {
        actions_dir: fx.actions.clone(),
        ..Default::default()
    };
    config.escalation.method = EscalationMethod::None;
    config.audit.enabled = false;

    assert!(matches!(
        ActionBroker::from_config(&config),
        Err(StartupError::AuditDisabled)
    ));

    config.audit = AuditConfig {
        enabled: true,
        stdout: false,
        directory: fx.audit.clone(),
        file_name: "audit.log".to_string(),
    };
    let broker = ActionBroker::from_config(&config).unwrap();
    assert_eq!(broker.registry().len(), 1);
}

// =============================================================================
// Registry lifecycle
// =============================================================================

#[tokio::test]
async fn test_reload_swaps_snapshot() {
    let fx = Fixture::new();
    fx.action("pagekite-start", "", "exit 0");
    let broker = fx.broker();
    let before = broker.registry();

    fx.action("pagekite-stop", "", "exit 0");
    let after = broker.reload().await.unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 2);
    assert!(broker.registry().lookup("pagekite-stop").is_ok());
    broker.submit("pagekite-stop", BTreeMap::new()).await.unwrap();
}

#[tokio::test]
async fn test_failed_reload_keeps_registry() {
    let fx = Fixture::new();
    fx.action("pagekite-start", "", "exit 0");
    let broker = fx.broker();

    let moved = fx.scratch("moved-actions");
    fs::rename(&fx.actions, &moved).unwrap();
    assert!(broker.reload().await.is_err());
    assert_eq!(broker.registry().len(), 1);
}

#[test]
fn test_submit_blocking_from_sync_caller() {
    let fx = Fixture::new();
    fx.action("pagekite-status", "", "echo enabled");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let broker = fx.broker();

    let result = broker
        .submit_blocking(runtime.handle(), "pagekite-status", BTreeMap::new())
        .unwrap();
    assert_eq!(result.stdout_lossy(), "enabled\n");
}
