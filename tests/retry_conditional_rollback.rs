// tests/retry_conditional_rollback.rs

//! The retry controller's operation-safety gating, wired up against a
//! live FTE transaction: a conditional (file-write) operation that
//! fails mid-retry must be rolled back to its pre-operation checkpoint
//! before the next attempt runs.

use std::cell::RefCell;
use std::fs;

use patchtx::{CallFailure, ErrorRegistry, OperationSafety, RetryConfig, RetryController, RetryOutcome, Transaction, TransactionConfig};
use tempfile::TempDir;

#[test]
fn conditional_retry_rolls_back_to_checkpoint_between_attempts() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "original").unwrap();

    let config = TransactionConfig::new(dir.path());
    let mut tx = Transaction::new(&config, "plan1", "main");
    tx.begin().unwrap();
    tx.create_checkpoint("pre_write", None).unwrap();

    tx.modify_file("a.txt", b"attempt-1".to_vec()).unwrap();
    tx.apply_next().unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "attempt-1");

    let registry = ErrorRegistry::new();
    let retry_config = RetryConfig { max_attempts: Some(2), max_delay_ms: Some(5), ..RetryConfig::default() };
    let mut controller = RetryController::new(retry_config, &registry);

    let calls = RefCell::new(0);
    let outcome = controller.execute(OperationSafety::Conditional, Some("pre_write"), Some(&mut tx), |_attempt| {
        *calls.borrow_mut() += 1;
        Err::<(), _>(CallFailure {
            http_code: 500,
            error_code: None,
            message: "server error".to_string(),
            provider: "anthropic".to_string(),
        })
    });

    assert_eq!(*calls.borrow(), 2);
    assert!(matches!(outcome, RetryOutcome::Exhausted { .. }));
    // The checkpoint rollback fired between the two attempts, restoring
    // the file to what it was before the staged write.
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "original");
}

#[test]
fn safe_operation_never_touches_the_transaction() {
    let dir = TempDir::new().unwrap();
    let config = TransactionConfig::new(dir.path());
    let mut tx = Transaction::new(&config, "plan1", "main");
    tx.begin().unwrap();

    let registry = ErrorRegistry::new();
    let mut controller = RetryController::new(RetryConfig::default(), &registry);
    let outcome = controller.execute(OperationSafety::Safe, None, None, |_attempt| Ok::<_, CallFailure>("pong"));
    match outcome {
        RetryOutcome::Succeeded { value, .. } => assert_eq!(value, "pong"),
        _ => panic!("expected success"),
    }
    tx.rollback("cleanup").unwrap();
}
