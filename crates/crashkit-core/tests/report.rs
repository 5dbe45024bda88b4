//! Tests for classification, hints and the report layout

use std::collections::TryReserveError;

use crashkit_core::report::{classify_message, classify_panic, hint_for, HintKey, ReportOptions, Reporter};
use crashkit_core::types::{ExceptionInfo, ExceptionKind, FailureEvent, SignalEvent, SignalKind};

fn reserve_error() -> TryReserveError
{
    Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err()
}

#[test]
fn test_std_panic_messages_are_classified()
{
    let index = vec![1, 2, 3];
    let message = std::panic::catch_unwind(|| index[std::hint::black_box(7)])
        .unwrap_err()
        .downcast::<String>()
        .unwrap();
    assert_eq!(classify_message(&message), ExceptionKind::OutOfRange);

    assert_eq!(classify_message("capacity overflow"), ExceptionKind::AllocationFailure);
    assert_eq!(
        classify_message("called `Result::unwrap()` on an `Err` value: ParseIntError { kind: InvalidDigit }"),
        ExceptionKind::InvalidArgument
    );
    assert_eq!(classify_message("database is gone"), ExceptionKind::RuntimeFailure);
}

#[test]
fn test_typed_payloads_are_classified()
{
    let payload: Box<dyn std::any::Any + Send> = Box::new(reserve_error());
    let (kind, message) = classify_panic(payload.as_ref());
    assert_eq!(kind, ExceptionKind::AllocationFailure);
    assert!(message.is_some());

    let payload: Box<dyn std::any::Any + Send> = Box::new("x".parse::<u8>().unwrap_err());
    assert_eq!(classify_panic(payload.as_ref()).0, ExceptionKind::InvalidArgument);

    let payload: Box<dyn std::any::Any + Send> = Box::new(42u64);
    let (kind, message) = classify_panic(payload.as_ref());
    assert_eq!(kind, ExceptionKind::Unknown);
    assert!(message.is_none());
}

#[test]
fn test_hints()
{
    let allocation = hint_for(HintKey::Exception(ExceptionKind::AllocationFailure)).unwrap();
    assert!(allocation.starts_with("*** MEMORY ALLOCATION FAILURE ***"));
    assert!(hint_for(HintKey::Signal(SignalKind::SegFault)).unwrap().contains("invalid memory access"));
    assert!(hint_for(HintKey::Exception(ExceptionKind::RuntimeFailure)).is_none());
    assert!(hint_for(HintKey::Signal(SignalKind::Other(99))).is_none());
}

#[test]
fn test_report_layout_without_context()
{
    let event = FailureEvent::UncaughtException(ExceptionInfo {
        kind: ExceptionKind::AllocationFailure,
        message: Some("memory allocation of 1024 bytes failed".into()),
        location: None,
        thread_name: Some("worker"),
    });
    let mut reporter = Reporter::new(Vec::new(), ReportOptions::default());
    let trace = reporter.report(&event, None);
    let text = String::from_utf8(reporter.into_inner()).unwrap();

    assert!(trace.is_empty());
    let headline = text.find("!!! FATAL: uncaught panic (allocation failure)").unwrap();
    let kind = text.find("Exception type: allocation failure").unwrap();
    let hint = text.find("Hint: *** MEMORY ALLOCATION FAILURE ***").unwrap();
    let stack = text.find("=== STACK TRACE ===").unwrap();
    assert!(headline < kind && kind < hint && hint < stack);
    assert!(text.contains("Thread: worker"));
    assert!(text.contains("no stack trace available"));
    assert!(text.trim_end().ends_with("!!!!"));
}

#[test]
fn test_user_sent_signal_has_no_fault_address()
{
    let event = FailureEvent::RuntimeSignal(SignalEvent {
        kind: SignalKind::Abort,
        code: -6,
        fault_address: None,
        thread_id: 42,
    });
    let mut reporter = Reporter::new(Vec::new(), ReportOptions::default());
    reporter.write_header(&event, None).unwrap();
    let text = String::from_utf8(reporter.into_inner()).unwrap();

    assert!(text.contains(&format!("Signal: {} (SIGABRT)", libc::SIGABRT)));
    assert!(text.contains("Signal code: SI_TKILL (-6)"));
    assert!(!text.contains("Fault address"));
    assert!(text.contains("Thread id: 42"));
}
