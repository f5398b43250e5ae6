#![allow(clippy::unwrap_used, clippy::expect_used)]

use invhist_core::errors::{ExError, ExErrorKind, NormalizeError};
use invhist_core::logging_facility::test_capture::init_test_capture;
use invhist_core::{log_op_end, log_op_error, log_op_start};
use invhist_core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};

#[test]
fn test_log_op_start_and_end() {
    let capture = init_test_capture();
    let op_name = "test_log_op_start_end_unique_1";

    log_op_start!(op_name, scope = "proj-a");
    log_op_end!(op_name, duration_ms = 42, count = 3);

    let events = capture.events_for_op(op_name);
    assert_eq!(events.len(), 2);

    let start = events
        .iter()
        .find(|e| e.event.as_deref() == Some(EVENT_START))
        .expect("start event");
    assert_eq!(start.field("scope"), Some("proj-a"));

    let end = events
        .iter()
        .find(|e| e.event.as_deref() == Some(EVENT_END))
        .expect("end event");
    assert_eq!(end.field("duration_ms"), Some("42"));
    assert_eq!(end.field("count"), Some("3"));
}

#[test]
fn test_log_op_error_records_code_and_kind() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_unique_2";

    let err = ExError::new(ExErrorKind::ConsistencyViolation).with_resource_id("i-1");
    log_op_error!(op_name, err, duration_ms = 7);

    capture.assert_event_exists(op_name, EVENT_END_ERROR);
    let event = capture
        .events_for_op(op_name)
        .into_iter()
        .find(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
        .expect("error event");

    assert_eq!(event.field("err_code"), Some("ERR_CONSISTENCY_VIOLATION"));
    assert_eq!(event.field("err_kind"), Some("ConsistencyViolation"));
    assert_eq!(event.level, tracing::Level::ERROR);
}

#[test]
fn test_log_op_error_accepts_normalize_error() {
    let capture = init_test_capture();
    let op_name = "test_log_op_error_normalize_unique_3";

    log_op_error!(op_name, NormalizeError::MissingId, duration_ms = 1);

    let event = capture
        .events_for_op(op_name)
        .into_iter()
        .next()
        .expect("error event");
    assert_eq!(event.field("err_code"), Some("ERR_MALFORMED_INPUT"));
}

#[test]
#[should_panic(expected = "Expected event")]
fn test_assert_event_exists_fails_for_missing_event() {
    let capture = init_test_capture();
    capture.assert_event_exists("nonexistent_op_truly_unique_999", EVENT_START);
}
