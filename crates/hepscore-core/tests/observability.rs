//! Structured lifecycle events of the suite.

use hepscore_core::{
    emit_attempt_finished, emit_benchmark_finished, emit_benchmark_started, emit_suite_finished,
    emit_suite_started, SuiteSpan,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_suite_events_carry_event_names() {
    emit_suite_started("HEPscore23", 7, false);
    emit_suite_finished("HEPscore23", 1021.9, "success", 86400);

    assert!(logs_contain("suite.started"));
    assert!(logs_contain("suite.finished"));
    assert!(logs_contain("HEPscore23"));
}

#[traced_test]
#[test]
fn test_benchmark_events() {
    emit_benchmark_started("atlas-gen_sherpa-ma-bmk", "v2.1", 3);
    emit_benchmark_finished("atlas-gen_sherpa-ma-bmk", 1.0312, false);

    assert!(logs_contain("benchmark.started"));
    assert!(logs_contain("benchmark.finished"));
    assert!(logs_contain("v2.1"));
}

#[traced_test]
#[test]
fn test_attempt_events_distinguish_spawn_failures() {
    emit_attempt_finished("db12-bmk", 0, Some(0), 42);
    emit_attempt_finished("db12-bmk", 1, Some(137), 3);
    emit_attempt_finished("db12-bmk", 2, None, 0);

    assert!(logs_contain("attempt.finished"));
    assert!(logs_contain("exit_status=137"));
    assert!(logs_contain("attempt.spawn_failed"));
}

#[traced_test]
#[test]
fn test_suite_span_tags_events() {
    let span = SuiteSpan::enter("HEPscore23", "0123456789abcdef0123456789abcdef");
    emit_benchmark_started("db12-bmk", "v2.2", 1);
    drop(span);

    assert!(logs_contain("hepscore.suite"));
    assert!(logs_contain("0123456789ab"));
}
