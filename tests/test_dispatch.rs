// Dispatch scenarios for the interpreter core: allow-list filtering,
// environment preparation, batch execution, concurrency and timeouts.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use codebox::interp::{BuildOutcome, CommandRequest, Dispatch, DispatchPolicy};

fn run_code(code: &str) -> CommandRequest {
    CommandRequest::new("run_code").with_param("code", code)
}

#[tokio::test]
async fn unrecognized_batch_is_ignored_without_side_effects() {
    let mut core = common::core(true, true);

    let batch = vec![
        CommandRequest::new("make_coffee"),
        CommandRequest::new("sudo_rm"),
    ];
    let outcome = core
        .router
        .dispatch(batch, None, DispatchPolicy::default())
        .await;

    assert!(matches!(outcome, Dispatch::Ignored));
    assert!(core.runtime.executed.lock().unwrap().is_empty());
    assert!(core.sinks.transcript_rx.try_recv().is_err());
    assert!(core.sinks.status_rx.try_recv().is_err());
}

#[tokio::test]
async fn runtime_missing_rejects_batch_without_build() {
    let mut core = common::core(false, false);

    let outcome = core
        .router
        .dispatch(vec![run_code("print(1)")], None, DispatchPolicy::default())
        .await;

    assert!(matches!(outcome, Dispatch::RuntimeMissing));
    assert_eq!(core.builder.builds.load(Ordering::SeqCst), 0);
    assert!(core.runtime.executed.lock().unwrap().is_empty());
    let status = common::drain_status(&mut core.sinks);
    assert!(status.iter().any(|s| s.contains("not installed")));
}

#[tokio::test]
async fn probe_fault_is_surfaced_not_retried() {
    let core = common::core(true, true);
    core.probe.set_fault("permission denied on /var/run/docker.sock");

    let outcome = core
        .router
        .dispatch(vec![run_code("print(1)")], None, DispatchPolicy::default())
        .await;

    match outcome {
        Dispatch::ProbeFailed(reason) => assert!(reason.contains("permission denied")),
        _ => panic!("expected ProbeFailed"),
    }
    assert_eq!(core.builder.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn image_missing_defers_batch_and_resubmission_succeeds() {
    let core = common::core(true, false);

    // First round: build starts, nothing executes.
    let outcome = core
        .router
        .dispatch(vec![run_code("print(1)")], None, DispatchPolicy::default())
        .await;
    let mut handle = match outcome {
        Dispatch::BuildStarted(handle) => handle,
        _ => panic!("expected BuildStarted"),
    };
    assert!(core.runtime.executed.lock().unwrap().is_empty());
    assert_eq!(handle.wait().await, BuildOutcome::Succeeded);

    // Environment now ready; the caller resubmits the original batch.
    core.probe.set_image_exists(true);
    let outcome = core
        .router
        .dispatch(vec![run_code("print(1)")], None, DispatchPolicy::default())
        .await;
    match outcome {
        Dispatch::Completed(ctx) => {
            assert_eq!(ctx.results.len(), 1);
            assert!(ctx.results[0].is_ok());
        }
        _ => panic!("expected Completed after resubmission"),
    }
}

#[tokio::test]
async fn build_start_is_idempotent_while_building() {
    let core = common::core_with(true, false, Duration::from_secs(5), true);

    let first = match core
        .router
        .dispatch(vec![run_code("a")], None, DispatchPolicy::default())
        .await
    {
        Dispatch::BuildStarted(h) => h,
        _ => panic!("expected BuildStarted"),
    };
    let second = match core
        .router
        .dispatch(vec![run_code("b")], None, DispatchPolicy::default())
        .await
    {
        Dispatch::BuildStarted(h) => h,
        _ => panic!("expected BuildStarted"),
    };

    // Same job observed by both rounds; only one build process spawned.
    assert_eq!(first.id(), second.id());
    assert_eq!(core.builder.builds.load(Ordering::SeqCst), 1);

    core.builder.finish_all(BuildOutcome::Succeeded);
}

#[tokio::test]
async fn partial_failure_preserves_order_and_continues() {
    let core = common::core(true, true);

    // Three host files: the middle one exits non-zero.
    std::fs::write(core.dir.path().join("a.sh"), "echo alpha\n").unwrap();
    std::fs::write(core.dir.path().join("b.sh"), "echo boom >&2\nexit 3\n").unwrap();
    std::fs::write(core.dir.path().join("c.sh"), "echo gamma\n").unwrap();

    let batch = vec![
        CommandRequest::new("run_file").with_param("path", "a.sh"),
        CommandRequest::new("run_file").with_param("path", "b.sh"),
        CommandRequest::new("run_file").with_param("path", "c.sh"),
    ];
    let outcome = core
        .router
        .dispatch(batch, None, DispatchPolicy::default())
        .await;

    let ctx = match outcome {
        Dispatch::Completed(ctx) => ctx,
        _ => panic!("expected Completed"),
    };
    assert_eq!(ctx.results.len(), 3);
    assert!(ctx.results[0].is_ok());
    assert!(!ctx.results[1].is_ok());
    assert!(ctx.results[2].is_ok());
    assert!(ctx.results[0]
        .result
        .as_ref()
        .unwrap()
        .as_str()
        .unwrap()
        .contains("alpha"));
    assert!(ctx.results[1].error.as_ref().unwrap().contains("exit code: 3"));
}

#[tokio::test]
async fn mixed_batch_results_follow_request_order() {
    let core = common::core(true, true);

    let batch = vec![
        CommandRequest::new("render_html").with_param("html", "<p>hi</p>"),
        run_code("x = 1"),
        CommandRequest::new("read_output"),
    ];
    let ctx = match core
        .router
        .dispatch(batch, None, DispatchPolicy::default())
        .await
    {
        Dispatch::Completed(ctx) => ctx,
        _ => panic!("expected Completed"),
    };

    let names: Vec<_> = ctx.results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["render_html", "run_code", "read_output"]);
    assert!(ctx.results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn forced_request_dispatches_in_background() {
    let core = common::core(true, true);

    let mut request = run_code("print('forced')");
    request.force = true;
    let outcome = core
        .router
        .dispatch(vec![request], None, DispatchPolicy::default())
        .await;

    let handle = match outcome {
        Dispatch::Background(handle) => handle,
        _ => panic!("expected Background for forced request"),
    };
    let ctx = handle.join().await;
    assert_eq!(ctx.results.len(), 1);
    assert!(ctx.results[0].is_ok());
}

#[tokio::test]
async fn second_batch_while_one_in_flight_is_busy() {
    let core = common::core_with(true, true, Duration::from_secs(2), false);

    let policy = DispatchPolicy {
        asynchronous: true,
        silent: false,
    };
    let first = core
        .router
        .dispatch(vec![run_code("hang")], None, policy)
        .await;
    let handle = match first {
        Dispatch::Background(handle) => handle,
        _ => panic!("expected Background"),
    };

    // Give the background task a moment to claim the slot.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = core
        .router
        .dispatch(vec![run_code("print(2)")], None, DispatchPolicy::default())
        .await;
    assert!(matches!(second, Dispatch::Busy));

    handle.cancel();
    handle.join().await;
    assert!(core.runtime.restarts.load(Ordering::SeqCst) >= 1);

    // Slot released; the next batch goes through.
    let third = core
        .router
        .dispatch(vec![run_code("print(3)")], None, DispatchPolicy::default())
        .await;
    assert!(matches!(third, Dispatch::Completed(_)));
}

#[tokio::test]
async fn silent_policy_suppresses_preparing_status() {
    let mut core = common::core(true, true);

    let policy = DispatchPolicy {
        asynchronous: false,
        silent: true,
    };
    core.router
        .dispatch(vec![run_code("x = 1")], None, policy)
        .await;

    let status = common::drain_status(&mut core.sinks);
    assert!(
        !status.iter().any(|s| s.contains("executing")),
        "silent dispatch leaked a preparing status: {status:?}"
    );
}

#[tokio::test]
async fn restart_session_emits_exactly_one_cleared() {
    let mut core = common::core(true, true);

    let ctx = match core
        .router
        .dispatch(
            vec![CommandRequest::new("restart_session")],
            None,
            DispatchPolicy::default(),
        )
        .await
    {
        Dispatch::Completed(ctx) => ctx,
        _ => panic!("expected Completed"),
    };

    assert!(ctx.results[0].is_ok());
    assert_eq!(core.runtime.restarts.load(Ordering::SeqCst), 1);
    assert!(core.sinks.clear_rx.try_recv().is_ok());
    assert!(core.sinks.clear_rx.try_recv().is_err(), "more than one Cleared");
}

#[tokio::test]
async fn failing_code_yields_trace_output_and_session_survives() {
    let mut core = common::core(true, true);

    let ctx = match core
        .router
        .dispatch(vec![run_code("1/0")], None, DispatchPolicy::default())
        .await
    {
        Dispatch::Completed(ctx) => ctx,
        _ => panic!("expected Completed"),
    };

    // The error trace is ordinary output, not a command failure.
    assert!(ctx.results[0].is_ok());
    let transcript = common::drain_transcript(&mut core.sinks);
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].contains("ZeroDivisionError"));
    assert_eq!(core.runtime.restarts.load(Ordering::SeqCst), 0);

    // Session still executes afterwards.
    let next = core
        .router
        .dispatch(vec![run_code("print('after')")], None, DispatchPolicy::default())
        .await;
    assert!(matches!(next, Dispatch::Completed(_)));
}

#[tokio::test]
async fn timeout_is_bounded_and_restarts_session() {
    let core = common::core_with(true, true, Duration::from_millis(200), false);

    let started = Instant::now();
    let ctx = match core
        .router
        .dispatch(vec![run_code("hang")], None, DispatchPolicy::default())
        .await
    {
        Dispatch::Completed(ctx) => ctx,
        _ => panic!("expected Completed"),
    };
    let elapsed = started.elapsed();

    assert!(!ctx.results[0].is_ok());
    assert!(ctx.results[0].error.as_ref().unwrap().contains("timed out"));
    assert!(
        elapsed < Duration::from_secs(2),
        "timeout not bounded: {elapsed:?}"
    );
    assert!(core.runtime.restarts.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn declared_syntax_reports_bound_workdir() {
    let core = common::core(true, true);

    let specs = core.router.command_syntax();
    let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
    for expected in [
        "run_code",
        "restart_session",
        "sandbox_shell",
        "run_file",
        "read_output",
        "clear_output",
        "render_html",
    ] {
        assert!(names.contains(&expected), "missing syntax for {expected}");
    }

    let run_code_spec = specs.iter().find(|s| s.name == "run_code").unwrap();
    assert!(run_code_spec.instruction.contains("/data"));
    assert!(run_code_spec
        .instruction
        .contains(core.dir.path().to_str().unwrap()));

    let shell_spec = specs.iter().find(|s| s.name == "sandbox_shell").unwrap();
    assert!(shell_spec.instruction.contains("absolute paths"));
}
