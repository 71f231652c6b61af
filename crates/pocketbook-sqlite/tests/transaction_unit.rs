// crates/pocketbook-sqlite/tests/transaction_unit.rs
// ============================================================================
// Module: Transaction Coordinator Unit Tests
// Description: Commit, rollback, savepoint nesting, deadlines, async bodies.
// Purpose: Validate atomicity and that nesting depth never leaks.
// ============================================================================

//! ## Overview
//! Unit-level tests for transaction coordination:
//! - Outermost commit and rollback, with caller error types
//! - Savepoint nesting (inner failure contained, outer failure total)
//! - Depth reset after errors and panics
//! - Deadlines for synchronous and asynchronous bodies
//! - Nested asynchronous frames joining the outer transaction

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use pocketbook_sqlite::DatabaseHandle;
use pocketbook_sqlite::DatabaseRegistry;
use pocketbook_sqlite::SqlValue;
use pocketbook_sqlite::SqliteAdapterConfig;
use pocketbook_sqlite::SqliteAdapterError;
use pocketbook_sqlite::TransactionOptions;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Caller-side error type wrapping adapter failures.
#[derive(Debug)]
enum LedgerError {
    Adapter(SqliteAdapterError),
    Rejected(&'static str),
}

impl From<SqliteAdapterError> for LedgerError {
    fn from(err: SqliteAdapterError) -> Self {
        Self::Adapter(err)
    }
}

fn open_budget(config: SqliteAdapterConfig) -> (DatabaseRegistry, Arc<DatabaseHandle>) {
    let registry = DatabaseRegistry::new(config).unwrap();
    let handle = registry.open(Some("budget.sqlite")).unwrap();
    handle.exec("CREATE TABLE IF NOT EXISTS accounts (name TEXT PRIMARY KEY)").unwrap();
    (registry, handle)
}

fn setup() -> (TempDir, DatabaseRegistry, Arc<DatabaseHandle>) {
    let dir = TempDir::new().unwrap();
    let (registry, handle) = open_budget(SqliteAdapterConfig::with_storage_dir(dir.path()));
    (dir, registry, handle)
}

fn insert(handle: &DatabaseHandle, name: &str) -> Result<(), SqliteAdapterError> {
    handle.execute("INSERT INTO accounts (name) VALUES (?1)", &[json!(name)]).map(|_| ())
}

fn names(handle: &DatabaseHandle) -> Vec<String> {
    handle
        .query("SELECT name FROM accounts ORDER BY name", &[])
        .unwrap()
        .iter()
        .filter_map(|row| row.get("name").and_then(SqlValue::as_str).map(str::to_string))
        .collect()
}

// ============================================================================
// SECTION: Synchronous Transactions
// ============================================================================

#[test]
fn successful_body_commits() {
    let (_dir, _registry, handle) = setup();
    let value = handle
        .transaction(|| {
            insert(&handle, "checking")?;
            insert(&handle, "savings")?;
            Ok::<_, SqliteAdapterError>(7)
        })
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(names(&handle), vec!["checking", "savings"]);
    assert_eq!(handle.transaction_depth().unwrap(), 0);
    assert_eq!(handle.stats().commits, 1);
}

#[test]
fn failing_body_rolls_back_and_returns_caller_error() {
    let (_dir, _registry, handle) = setup();
    let result: Result<(), LedgerError> = handle.transaction(|| {
        insert(&handle, "checking")?;
        Err(LedgerError::Rejected("over budget"))
    });
    match result {
        Err(LedgerError::Rejected(reason)) => assert_eq!(reason, "over budget"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
    assert_eq!(handle.stats().rollbacks, 1);
}

#[test]
fn statement_failure_inside_body_rolls_back() {
    let (_dir, _registry, handle) = setup();
    let result: Result<(), LedgerError> = handle.transaction(|| {
        insert(&handle, "checking")?;
        insert(&handle, "checking")?;
        Ok(())
    });
    match result {
        Err(LedgerError::Adapter(err)) => {
            assert_eq!(err.sql(), Some("INSERT INTO accounts (name) VALUES (?1)"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(names(&handle).is_empty());
}

#[test]
fn inner_failure_is_contained_by_savepoint() {
    let (_dir, _registry, handle) = setup();
    handle
        .transaction(|| {
            insert(&handle, "outer")?;
            let inner: Result<(), LedgerError> = handle.transaction(|| {
                insert(&handle, "inner")?;
                assert_eq!(handle.transaction_depth().unwrap(), 2);
                Err(LedgerError::Rejected("inner"))
            });
            assert!(inner.is_err());
            assert_eq!(handle.transaction_depth().unwrap(), 1);
            insert(&handle, "after")?;
            Ok::<_, SqliteAdapterError>(())
        })
        .unwrap();
    assert_eq!(names(&handle), vec!["after", "outer"]);
}

#[test]
fn outer_failure_discards_committed_inner_work() {
    let (_dir, _registry, handle) = setup();
    let result: Result<(), LedgerError> = handle.transaction(|| {
        handle.transaction(|| insert(&handle, "inner"))?;
        insert(&handle, "outer")?;
        Err(LedgerError::Rejected("outer"))
    });
    assert!(matches!(result, Err(LedgerError::Rejected("outer"))));
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[test]
fn deeply_nested_savepoints_unwind_in_order() {
    let (_dir, _registry, handle) = setup();
    handle
        .transaction(|| {
            insert(&handle, "a")?;
            handle.transaction(|| {
                insert(&handle, "b")?;
                let _ = handle.transaction(|| {
                    insert(&handle, "c")?;
                    Err::<(), _>(SqliteAdapterError::InvalidState("discard c".to_string()))
                });
                Ok::<_, SqliteAdapterError>(())
            })
        })
        .unwrap();
    assert_eq!(names(&handle), vec!["a", "b"]);
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[test]
fn panicking_body_rolls_back_and_resets_depth() {
    let (_dir, _registry, handle) = setup();
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), SqliteAdapterError> = handle.transaction(|| {
            insert(&handle, "doomed")?;
            panic!("body panicked");
        });
    }));
    assert!(outcome.is_err());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
    assert!(!handle.in_transaction().unwrap());
    assert!(names(&handle).is_empty());
    handle.transaction(|| insert(&handle, "recovered")).unwrap();
    assert_eq!(names(&handle), vec!["recovered"]);
}

#[test]
fn sync_deadline_overrun_rolls_back() {
    let (_dir, _registry, handle) = setup();
    let options = TransactionOptions::with_timeout(Duration::from_millis(10));
    let result = handle.transaction_with(options, || {
        insert(&handle, "slow")?;
        std::thread::sleep(Duration::from_millis(50));
        Ok::<_, SqliteAdapterError>(())
    });
    assert!(matches!(result, Err(SqliteAdapterError::TransactionTimeout { limit_ms: 10 })));
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[test]
fn configured_default_deadline_applies() {
    let dir = TempDir::new().unwrap();
    let config = SqliteAdapterConfig {
        transaction_timeout_ms: Some(5),
        ..SqliteAdapterConfig::with_storage_dir(dir.path())
    };
    let (_registry, handle) = open_budget(config);
    assert_eq!(handle.default_transaction_options().timeout, Some(Duration::from_millis(5)));
    let result = handle.transaction(|| {
        std::thread::sleep(Duration::from_millis(30));
        insert(&handle, "late")
    });
    assert!(matches!(result, Err(SqliteAdapterError::TransactionTimeout { limit_ms: 5 })));
    assert!(names(&handle).is_empty());
}

#[test]
fn transaction_on_closed_handle_fails_cleanly() {
    let (_dir, registry, handle) = setup();
    registry.close(&handle);
    let result = handle.transaction(|| Ok::<_, SqliteAdapterError>(()));
    assert!(matches!(result, Err(SqliteAdapterError::Closed { .. })));
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[test]
fn engine_ended_transaction_keeps_statement_error() {
    let (_dir, _registry, handle) = setup();
    handle.exec("CREATE TABLE strict_ids (id INTEGER PRIMARY KEY ON CONFLICT ROLLBACK)").unwrap();
    let sql = "INSERT INTO strict_ids (id) VALUES (?1)";
    let result = handle.transaction(|| {
        handle.execute(sql, &[json!(1)])?;
        handle.execute(sql, &[json!(1)])?;
        Ok::<_, SqliteAdapterError>(())
    });
    let err = result.unwrap_err();
    assert!(matches!(err, SqliteAdapterError::Native { .. }));
    assert_eq!(err.sql(), Some(sql));
    assert_eq!(handle.transaction_depth().unwrap(), 0);
    let rows = handle.query("SELECT COUNT(*) AS n FROM strict_ids", &[]).unwrap();
    assert_eq!(rows[0].get("n").and_then(SqlValue::as_i64), Some(0));
    handle.transaction(|| insert(&handle, "usable")).unwrap();
    assert_eq!(names(&handle), vec!["usable"]);
}

#[test]
fn engine_ended_transaction_inside_savepoint_keeps_statement_error() {
    let (_dir, _registry, handle) = setup();
    handle.exec("CREATE TABLE strict_ids (id INTEGER PRIMARY KEY ON CONFLICT ROLLBACK)").unwrap();
    let sql = "INSERT INTO strict_ids (id) VALUES (?1)";
    let result = handle.transaction(|| {
        insert(&handle, "outer")?;
        handle.execute(sql, &[json!(1)])?;
        handle.transaction(|| handle.execute(sql, &[json!(1)]).map(|_| ()))
    });
    let err = result.unwrap_err();
    assert_eq!(err.sql(), Some(sql));
    assert_eq!(handle.transaction_depth().unwrap(), 0);
    assert!(names(&handle).is_empty());
}

#[test]
fn failing_rollback_replaces_body_error() {
    let (_dir, registry, handle) = setup();
    let result: Result<(), LedgerError> = handle.transaction(|| {
        insert(&handle, "checking")?;
        registry.close(&handle);
        Err(LedgerError::Rejected("closed mid-transaction"))
    });
    match result {
        Err(LedgerError::Adapter(SqliteAdapterError::Closed {
            name,
        })) => assert_eq!(name, "budget.sqlite"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

// ============================================================================
// SECTION: Asynchronous Transactions
// ============================================================================

#[tokio::test]
async fn async_body_commits() {
    let (_dir, _registry, handle) = setup();
    handle
        .async_transaction(|| async {
            insert(&handle, "checking")?;
            tokio::task::yield_now().await;
            insert(&handle, "savings")?;
            Ok::<_, SqliteAdapterError>(())
        })
        .await
        .unwrap();
    assert_eq!(names(&handle), vec!["checking", "savings"]);
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[tokio::test]
async fn async_failure_rolls_back() {
    let (_dir, _registry, handle) = setup();
    let result: Result<(), LedgerError> = handle
        .async_transaction(|| async {
            insert(&handle, "checking")?;
            Err::<(), _>(LedgerError::Rejected("async"))
        })
        .await;
    assert!(matches!(result, Err(LedgerError::Rejected("async"))));
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[tokio::test]
async fn async_deadline_cancels_body_and_rolls_back() {
    let (_dir, _registry, handle) = setup();
    let options = TransactionOptions::with_timeout(Duration::from_millis(20));
    let result = handle
        .async_transaction_with(options, || async {
            insert(&handle, "stalled")?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SqliteAdapterError>(())
        })
        .await;
    assert!(matches!(result, Err(SqliteAdapterError::TransactionTimeout { limit_ms: 20 })));
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[tokio::test]
async fn nested_async_frames_share_outer_transaction() {
    let (_dir, _registry, handle) = setup();
    handle
        .async_transaction(|| async {
            insert(&handle, "outer")?;
            handle
                .async_transaction(|| async {
                    assert_eq!(handle.transaction_depth()?, 2);
                    insert(&handle, "inner")
                })
                .await?;
            Ok::<_, SqliteAdapterError>(())
        })
        .await
        .unwrap();
    assert_eq!(names(&handle), vec!["inner", "outer"]);
    assert_eq!(handle.stats().commits, 1);
}

#[tokio::test]
async fn nested_async_failure_propagates_to_outer() {
    let (_dir, _registry, handle) = setup();
    let result: Result<(), LedgerError> = handle
        .async_transaction(|| async {
            insert(&handle, "outer")?;
            handle
                .async_transaction(|| async {
                    insert(&handle, "inner")?;
                    Err::<(), _>(LedgerError::Rejected("inner"))
                })
                .await
        })
        .await;
    assert!(matches!(result, Err(LedgerError::Rejected("inner"))));
    assert!(names(&handle).is_empty());
    assert_eq!(handle.transaction_depth().unwrap(), 0);
}

#[tokio::test]
async fn sync_frame_inside_async_uses_savepoint() {
    let (_dir, _registry, handle) = setup();
    handle
        .async_transaction(|| async {
            insert(&handle, "outer")?;
            let _ = handle.transaction(|| {
                insert(&handle, "inner")?;
                Err::<(), _>(SqliteAdapterError::InvalidState("discard".to_string()))
            });
            Ok::<_, SqliteAdapterError>(())
        })
        .await
        .unwrap();
    assert_eq!(names(&handle), vec!["outer"]);
}
