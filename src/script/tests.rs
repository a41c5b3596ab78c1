//! Script runtime tests

use super::*;
use crate::host::{NullHost, Service};
use crate::kind::{ExtractionKind, VALVE_PROTOCOL};
use crate::wait::{TimedWaitControl, WaitGroup};
use maplit::hashmap;
use std::io::Write;
use std::time::{Duration, Instant};

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        interval_poll_ms: 10,
        block_poll_ms: 5,
        wait_threshold_secs: 10.0,
        debug_sleep: false,
        script_extension: "lab".to_string(),
    }
}

fn make_script(body: &str) -> Script {
    let mut script = Script::new("", "inline.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text(body);
    script
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let mut file = fs::File::create(dir.join(name)).expect("create script file");
    file.write_all(body.as_bytes()).expect("write script file");
}

/* ===================== Dry run ===================== */

#[test]
fn test_dry_run_accumulates_sleep_durations() {
    let mut script = make_script("def main() { sleep(5) sleep(3) }");
    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 8.0);
    assert_eq!(script.interval_depth(), 0);
}

#[test]
fn test_dry_run_is_idempotent() {
    let mut script = make_script("def main() { sleep(5) sleep(3) }");
    script.test().expect("first dry run failed");
    let first = script.estimated_duration();
    script.test().expect("second dry run failed");
    assert_eq!(script.estimated_duration(), first);
}

#[test]
fn test_dry_run_does_not_sleep() {
    let mut script = make_script("def main() { sleep(60) }");
    let start = Instant::now();
    script.test().expect("dry run failed");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(script.estimated_duration(), 60.0);
}

#[test]
fn test_interval_counts_toward_estimate() {
    let mut script = make_script(
        "def main() { begin_interval(duration=2, name=\"warmup\") sleep(1) complete_interval() }",
    );
    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 3.0);
    assert_eq!(script.outcome(), ScriptOutcome::Running);
}

#[test]
fn test_nested_with_intervals() {
    let mut script =
        make_script("def main() { with interval(1) { with interval(2) { sleep(1) } } }");
    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 4.0);
    assert_eq!(script.interval_depth(), 0);
}

#[test]
fn test_unterminated_interval_is_an_error() {
    let mut script = make_script("def main() { begin_interval(duration=2) }");
    match script.test() {
        Err(ScriptError::UnterminatedInterval { script: name }) => {
            assert_eq!(name, "inline.lab");
        }
        other => panic!("expected UnterminatedInterval, got {:?}", other),
    }
    // the stack is drained so the script is not left with stale entries
    assert_eq!(script.interval_depth(), 0);
}

#[test]
fn test_with_interval_releases_on_error() {
    let mut script = make_script("def main() { with interval(2) { bogus() } }");
    match script.test() {
        Err(ScriptError::Syntax { detail, .. }) => assert!(detail.contains("bogus")),
        other => panic!("expected Syntax, got {:?}", other),
    }
    // release ran despite the body error
    assert_eq!(script.interval_depth(), 0);
    assert_eq!(script.estimated_duration(), 2.0);
}

#[test]
fn test_parse_error_is_syntax_error() {
    let mut script = make_script("def main() { sleep(1 }");
    assert!(matches!(script.test(), Err(ScriptError::Syntax { .. })));
}

#[test]
fn test_missing_entry_point() {
    let mut script = make_script("def setup() { sleep(1) }");
    match script.test() {
        Err(ScriptError::Syntax { detail, .. }) => assert!(detail.contains("main")),
        other => panic!("expected Syntax, got {:?}", other),
    }
}

#[test]
fn test_unknown_command_fails_dry_run() {
    let mut script = make_script("def main() { fire_lasers() }");
    assert!(matches!(script.test(), Err(ScriptError::Syntax { .. })));
}

#[test]
fn test_parameter_count_checked_in_dry_run() {
    // interval requires a duration
    let mut script = make_script("def main() { with interval() { sleep(1) } }");
    match script.test() {
        Err(ScriptError::Syntax { detail, .. }) => {
            assert!(detail.contains("interval"), "detail: {}", detail);
        }
        other => panic!("expected Syntax, got {:?}", other),
    }
}

#[test]
fn test_recursion_limit() {
    let mut script = make_script("def main() { main() }");
    match script.test() {
        Err(ScriptError::Syntax { detail, .. }) => assert!(detail.contains("depth")),
        other => panic!("expected Syntax, got {:?}", other),
    }
}

#[test]
fn test_local_defs_run_per_call() {
    let mut script = make_script("def prep() { sleep(2) } def main() { prep() prep() }");
    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 4.0);
}

#[test]
fn test_context_override_binds_variable() {
    let mut script = make_script("def main() { sleep(hold) }");
    script.setup_context(hashmap! {"hold".to_string() => Value::Num(3.0)});
    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 3.0);
}

#[test]
fn test_main_argv_binds_parameters() {
    let mut script = make_script("def main(hold) { sleep(hold) }");
    script
        .test_with_argv(&[Value::Num(7.0)])
        .expect("dry run failed");
    assert_eq!(script.estimated_duration(), 7.0);
}

#[test]
fn test_calculate_estimated_duration_triggers_test() {
    let mut script = make_script("def main() { sleep(5) sleep(3) }");
    let estimate = script
        .calculate_estimated_duration()
        .expect("estimate failed");
    assert_eq!(estimate, 8.0);
    // latched: a second query does not re-run or change the estimate
    assert_eq!(
        script.calculate_estimated_duration().expect("re-query"),
        8.0
    );
}

/* ===================== Interval state ===================== */

#[test]
fn test_complete_interval_underflow() {
    let mut script = make_script("def main() { }");
    match script.complete_interval() {
        Err(ScriptError::IntervalUnderflow) => {}
        other => panic!("expected IntervalUnderflow, got {:?}", other),
    }
    // no other state was disturbed
    assert_eq!(script.outcome(), ScriptOutcome::Running);
    assert_eq!(script.estimated_duration(), 0.0);
}

/* ===================== Gosub ===================== */

#[test]
fn test_gosub_missing_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { gosub(\"missing\") }");

    match script.test() {
        Err(ScriptError::Syntax { detail, .. }) => {
            assert!(detail.contains("missing.lab"), "detail: {}", detail);
        }
        other => panic!("expected Syntax, got {:?}", other),
    }
    // never partially assigned
    assert!(script.state().child().is_none());
}

#[test]
fn test_gosub_unknown_script_type() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(dir.path(), "child.lab", "def main() { }");

    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { }");

    match script.gosub("child", None, Some("Nope"), Vec::new()) {
        Err(ScriptError::UnknownScriptType { name }) => assert_eq!(name, "Nope"),
        other => panic!("expected UnknownScriptType, got {:?}", other),
    }
    assert!(script.state().child().is_none());
}

#[test]
fn test_gosub_child_estimate_propagates_to_parent() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(dir.path(), "child.lab", "def main() { sleep(5) sleep(3) }");

    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { gosub(\"child\") }");

    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 8.0);
}

#[test]
fn test_gosub_forwards_arguments_to_child_main() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(dir.path(), "child.lab", "def main(hold) { sleep(hold) }");

    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { gosub(\"child\", none, none, 7) }");

    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 7.0);
}

#[test]
fn test_gosub_nested_path_separator() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("prep")).expect("mkdir");
    write_script(
        &dir.path().join("prep"),
        "warmup.lab",
        "def main() { sleep(2) }",
    );

    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { gosub(\"prep/warmup\") }");

    script.test().expect("dry run failed");
    assert_eq!(script.estimated_duration(), 2.0);
}

#[test]
fn test_exit_in_gosub_chain_cancels_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(dir.path(), "a.lab", "def main() { gosub(\"b\") sleep(9) }");
    write_script(dir.path(), "b.lab", "def main() { gosub(\"c\") }");
    write_script(dir.path(), "c.lab", "def main() { exit() }");

    let mut script = Script::new(dir.path(), "a.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    let start = Instant::now();
    let completed = script.execute(ExecuteOptions::default()).expect("execute");

    assert!(!completed);
    assert_eq!(script.outcome(), ScriptOutcome::Canceled);
    // the trailing sleep(9) was skipped once canceled
    assert!(start.elapsed() < Duration::from_secs(5));
}

/* ===================== Real execution ===================== */

#[test]
fn test_execute_interval_and_sleep() {
    let mut script = make_script(
        "def main() { begin_interval(duration=0.3, name=\"warmup\") sleep(0.1) complete_interval() }",
    );
    let start = Instant::now();
    let completed = script.execute(ExecuteOptions::default()).expect("execute");

    assert!(completed);
    assert_eq!(script.outcome(), ScriptOutcome::Completed);
    assert_eq!(script.interval_depth(), 0);
    let elapsed = start.elapsed().as_secs_f64();
    assert!(elapsed >= 0.25, "elapsed {}", elapsed);
    assert!(elapsed < 3.0, "elapsed {}", elapsed);
}

#[test]
fn test_execute_records_runtime_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = Script::new(dir.path(), "parent.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.set_text("def main() { gosub(\"missing\") }");
    // pretend validation already happened so the failure hits the real pass
    script.state().mark_syntax_checked();

    let completed = script.execute(ExecuteOptions::default()).expect("execute");
    assert!(!completed);
    assert!(matches!(
        script.last_error(),
        Some(ScriptError::GosubTargetNotFound { .. })
    ));
}

#[test]
fn test_background_execute_cancel_observed_by_gate() {
    let mut script =
        make_script("def main() { begin_interval(duration=30) complete_interval() }");
    script.test().expect("dry run failed");

    let handle = script.execute_background(ExecuteOptions {
        bootstrap: false,
        ..Default::default()
    });
    thread::sleep(Duration::from_millis(100));
    assert!(!handle.is_finished());

    let start = Instant::now();
    handle.cancel();
    let (script, completed) = handle.join().expect("join");

    assert!(!completed);
    assert_eq!(script.outcome(), ScriptOutcome::Canceled);
    // cancellation unblocked the interval wait well before its deadline
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_on_finished_callback_runs() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut script = make_script("def main() { }");
    let completed = script
        .execute(ExecuteOptions {
            on_finished: Some(Box::new({
                let flag = flag.clone();
                move || flag.store(true, Ordering::SeqCst)
            })),
            ..Default::default()
        })
        .expect("execute");
    assert!(completed);
    assert!(flag.load(Ordering::SeqCst));
}

/* ===================== Cancellation / truncation ===================== */

#[test]
fn test_cancel_cascades_both_directions() {
    let a = Arc::new(ScriptState::new("a"));
    let b = Arc::new(ScriptState::new("b"));
    let c = Arc::new(ScriptState::new("c"));
    a.set_child(Some(b.clone()));
    b.set_parent(Arc::downgrade(&a));
    b.set_child(Some(c.clone()));
    c.set_parent(Arc::downgrade(&b));

    let hook_fired = Arc::new(AtomicBool::new(false));
    c.set_cancel_hook(Box::new({
        let hook_fired = hook_fired.clone();
        move || hook_fired.store(true, Ordering::SeqCst)
    }));

    c.cancel();

    assert_eq!(a.outcome(), ScriptOutcome::Canceled);
    assert_eq!(b.outcome(), ScriptOutcome::Canceled);
    assert_eq!(c.outcome(), ScriptOutcome::Canceled);
    assert!(hook_fired.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_is_idempotent() {
    let state = Arc::new(ScriptState::new("s"));
    state.cancel();
    state.cancel();
    assert_eq!(state.outcome(), ScriptOutcome::Canceled);
}

#[test]
fn test_truncate_cascades_downward_only() {
    let parent = Arc::new(ScriptState::new("parent"));
    let child = Arc::new(ScriptState::new("child"));
    parent.set_child(Some(child.clone()));
    child.set_parent(Arc::downgrade(&parent));

    child.truncate();
    assert!(child.is_truncated());
    assert!(!parent.is_truncated());

    parent.truncate();
    assert!(parent.is_truncated());
}

#[test]
fn test_truncated_dispatch_skips_handler() {
    let mut script = make_script("def main() { }");
    script.state().truncate();

    let spec = commands::global_commands()
        .into_iter()
        .find(|s| s.name == "sleep")
        .expect("sleep registered");
    let start = Instant::now();
    let result = script.dispatch(
        spec,
        Invocation::new("sleep", vec![Value::Num(5.0)], HashMap::new()),
    );

    assert!(matches!(result, Ok(Value::Null)));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(script.estimated_duration(), 0.0);
}

/* ===================== Wait control path ===================== */

struct CancelingHost {
    waits: WaitGroup,
}

impl Host for CancelingHost {
    fn get_service(&self, _: &str, _: Option<&str>) -> Option<Arc<dyn Service>> {
        None
    }

    fn info(&self, _: &str) {}

    fn wait_group(&self) -> &WaitGroup {
        &self.waits
    }

    fn make_wait_control(
        &self,
        wait_secs: f64,
        message: &str,
    ) -> Arc<dyn crate::wait::WaitControl> {
        // operator hits cancel immediately
        let control = TimedWaitControl::new(wait_secs, message, Duration::from_millis(5));
        control.cancel();
        Arc::new(control)
    }
}

#[test]
fn test_long_sleep_uses_wait_control() {
    let mut config = test_config();
    config.wait_threshold_secs = 0.05;
    let host = Arc::new(NullHost::new());
    let mut script = Script::new("", "inline.lab", host.clone()).with_config(config);
    script.set_text("def main() { sleep(0.2, \"settling\") }");

    let completed = script.execute(ExecuteOptions::default()).expect("execute");
    assert!(completed);
    // the active-control slot was released
    assert!(host.wait_group().active().is_none());
}

#[test]
fn test_wait_control_cancel_cancels_script() {
    let mut config = test_config();
    config.wait_threshold_secs = 0.05;
    let mut script = Script::new(
        "",
        "inline.lab",
        Arc::new(CancelingHost {
            waits: WaitGroup::new(),
        }),
    )
    .with_config(config);
    script.set_text("def main() { sleep(5) }");

    let start = Instant::now();
    let completed = script.execute(ExecuteOptions::default()).expect("execute");
    assert!(!completed);
    assert_eq!(script.outcome(), ScriptOutcome::Canceled);
    assert!(start.elapsed() < Duration::from_secs(4));
}

/* ===================== Script types / services ===================== */

#[derive(Default)]
struct RecordingService {
    calls: Mutex<Vec<String>>,
}

impl Service for RecordingService {
    fn invoke(&self, action: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let target = args.first().map(|v| v.to_string()).unwrap_or_default();
        self.calls
            .lock()
            .expect("poisoned")
            .push(format!("{} {}", action, target));
        Ok(Value::Bool(true))
    }
}

struct ValveHost {
    valves: Arc<RecordingService>,
    waits: WaitGroup,
}

impl Host for ValveHost {
    fn get_service(&self, protocol: &str, _name: Option<&str>) -> Option<Arc<dyn Service>> {
        (protocol == VALVE_PROTOCOL).then(|| self.valves.clone() as Arc<dyn Service>)
    }

    fn info(&self, _: &str) {}

    fn wait_group(&self) -> &WaitGroup {
        &self.waits
    }

    fn make_wait_control(
        &self,
        wait_secs: f64,
        message: &str,
    ) -> Arc<dyn crate::wait::WaitControl> {
        Arc::new(TimedWaitControl::new(
            wait_secs,
            message,
            Duration::from_millis(5),
        ))
    }
}

#[test]
fn test_extraction_kind_valve_commands() {
    let valves = Arc::new(RecordingService::default());
    let host = Arc::new(ValveHost {
        valves: valves.clone(),
        waits: WaitGroup::new(),
    });
    let mut script = Script::new("", "inline.lab", host)
        .with_kind(Arc::new(ExtractionKind))
        .with_config(test_config());
    script.set_text("def main() { open(\"A\") close(\"A\") }");

    let completed = script.execute(ExecuteOptions::default()).expect("execute");
    assert!(completed);

    let calls = valves.calls.lock().expect("poisoned").clone();
    assert_eq!(calls, vec!["open A".to_string(), "close A".to_string()]);
}

#[test]
fn test_valve_commands_skipped_in_dry_run() {
    let valves = Arc::new(RecordingService::default());
    let host = Arc::new(ValveHost {
        valves: valves.clone(),
        waits: WaitGroup::new(),
    });
    let mut script = Script::new("", "inline.lab", host)
        .with_kind(Arc::new(ExtractionKind))
        .with_config(test_config());
    script.set_text("def main() { open(\"A\") sleep(1) }");

    script.test().expect("dry run failed");
    assert!(valves.calls.lock().expect("poisoned").is_empty());
    assert_eq!(script.estimated_duration(), 1.0);
}

struct StuckService;

impl Service for StuckService {
    fn invoke(&self, action: &str, _args: &[Value]) -> Result<Value, ScriptError> {
        Err(ScriptError::Host(format!("{}: valve stuck", action)))
    }
}

struct StuckValveHost {
    waits: WaitGroup,
}

impl Host for StuckValveHost {
    fn get_service(&self, protocol: &str, _name: Option<&str>) -> Option<Arc<dyn Service>> {
        (protocol == VALVE_PROTOCOL).then(|| Arc::new(StuckService) as Arc<dyn Service>)
    }

    fn info(&self, _: &str) {}

    fn wait_group(&self) -> &WaitGroup {
        &self.waits
    }

    fn make_wait_control(
        &self,
        wait_secs: f64,
        message: &str,
    ) -> Arc<dyn crate::wait::WaitControl> {
        Arc::new(TimedWaitControl::new(
            wait_secs,
            message,
            Duration::from_millis(5),
        ))
    }
}

#[test]
fn test_service_failure_recorded_as_run_error() {
    let mut script = Script::new(
        "",
        "inline.lab",
        Arc::new(StuckValveHost {
            waits: WaitGroup::new(),
        }),
    )
    .with_kind(Arc::new(ExtractionKind))
    .with_config(test_config());
    script.set_text("def main() { open(\"A\") }");

    let completed = script.execute(ExecuteOptions::default()).expect("execute");
    assert!(!completed);
    assert!(matches!(script.last_error(), Some(ScriptError::Host(_))));
}

#[test]
fn test_kind_variable_visible_to_snippet() {
    let mut script = make_script("def main() { info(extract_device) }");
    script.set_kind(Arc::new(ExtractionKind));
    script.test().expect("dry run failed");
}

#[test]
fn test_global_vocabulary_overrides_kind_command() {
    struct ShadowingKind;
    fn fake_exit(_: &mut Script, _: &Invocation) -> Result<Value, ScriptError> {
        Ok(Value::Null)
    }
    impl crate::kind::ScriptKind for ShadowingKind {
        fn name(&self) -> &'static str {
            "ShadowingKind"
        }
        fn commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec {
                name: "exit",
                policy: DispatchPolicy::Skip,
                required_args: 0,
                handler: fake_exit,
            }]
        }
    }

    let script = Script::new("", "inline.lab", Arc::new(NullHost::new()))
        .with_kind(Arc::new(ShadowingKind));
    let resolved = script.registry.lookup("exit").expect("exit registered");
    assert_ne!(resolved.handler as usize, fake_exit as usize);
    assert_eq!(resolved.policy, DispatchPolicy::VerboseSkip);
}

/* ===================== Source management ===================== */

#[test]
fn test_bootstrap_loads_file_and_check_for_modifications() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_script(dir.path(), "run.lab", "def main() { sleep(1) }");

    let mut script = Script::new(dir.path(), "run.lab", Arc::new(NullHost::new()))
        .with_config(test_config());
    script.bootstrap().expect("bootstrap");
    assert_eq!(script.to_blob(), "def main() { sleep(1) }");
    assert!(!script.check_for_modifications().expect("check"));

    write_script(dir.path(), "run.lab", "def main() { sleep(2) }");
    assert!(script.check_for_modifications().expect("check"));
}

#[test]
fn test_bootstrap_missing_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut script = Script::new(dir.path(), "typo.lab", Arc::new(NullHost::new()))
        .with_config(test_config());

    match script.bootstrap() {
        Err(ScriptError::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected Io, got {:?}", other),
    }
}

#[test]
fn test_syntax_ok() {
    let mut good = make_script("def main() { sleep(1) }");
    assert!(good.syntax_ok());

    let mut bad = make_script("def main() { nope() }");
    assert!(!bad.syntax_ok());
}
