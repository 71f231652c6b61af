// crates/pocketbook-sqlite/src/transaction.rs
// ============================================================================
// Module: Transaction Coordinator
// Description: Nested transactions and savepoints for sync and async bodies.
// Purpose: Commit on success, roll back on failure, never leak nesting depth.
// Dependencies: tokio, tracing
// ============================================================================

//! ## Overview
//! The outermost frame on a handle issues `BEGIN`/`COMMIT`/`ROLLBACK`.
//! Nested synchronous frames use named savepoints; a failed savepoint is
//! rolled back and then released, because `ROLLBACK TO` does not end the
//! enclosing transaction. Nested asynchronous frames share the outer
//! transaction and issue nothing of their own.
//!
//! Frames are guards: dropping an unfinished frame (unwind, cancelled
//! future) rolls it back, and every drop decrements the handle depth.
//! The body's own error is returned unchanged after rollback; a failing
//! rollback replaces it. When the engine has already ended the transaction
//! (a conflict clause or trigger rolled it back), no rollback is issued and
//! the body's error stands.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;
use std::time::Instant;

use crate::error::SqliteAdapterError;
use crate::handle::DatabaseHandle;
use crate::handle::HandleOp;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Per-call transaction options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Deadline for the body; exceeded transactions are rolled back.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    /// Options with the given deadline.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

// ============================================================================
// SECTION: Frames
// ============================================================================

/// How a frame nests inside an already-open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestingStyle {
    /// Nested frames open their own savepoint.
    Savepoint,
    /// Nested frames join the outer transaction.
    Shared,
}

/// Statements a frame issues.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameKind {
    /// Outermost frame owning the real transaction.
    Root,
    /// Nested frame bounded by the named savepoint.
    Savepoint(String),
    /// Nested frame sharing the outer transaction.
    Shared,
}

impl FrameKind {
    /// Returns the statement opening this frame.
    fn begin_sql(&self) -> Option<String> {
        match self {
            Self::Root => Some("BEGIN".to_string()),
            Self::Savepoint(name) => Some(format!("SAVEPOINT {name}")),
            Self::Shared => None,
        }
    }

    /// Returns the statement completing this frame.
    fn commit_sql(&self) -> Option<String> {
        match self {
            Self::Root => Some("COMMIT".to_string()),
            Self::Savepoint(name) => Some(format!("RELEASE {name}")),
            Self::Shared => None,
        }
    }

    /// Returns the statements undoing this frame. A savepoint is released
    /// after rolling back to it, since `ROLLBACK TO` leaves it on the stack.
    fn rollback_sql(&self) -> Option<String> {
        match self {
            Self::Root => Some("ROLLBACK".to_string()),
            Self::Savepoint(name) => Some(format!("ROLLBACK TO {name}; RELEASE {name}")),
            Self::Shared => None,
        }
    }
}

/// Returns the savepoint name used at `depth`.
fn savepoint_name(depth: u32) -> String {
    format!("__pocketbook_sp_{depth}")
}

/// One level of nested transaction on a handle.
///
/// # Invariants
/// - Depth was incremented exactly once on entry and is decremented exactly
///   once on drop.
/// - `pending` is cleared only after the frame committed or rolled back.
struct TransactionFrame<'h> {
    /// Handle the frame runs on.
    handle: &'h DatabaseHandle,
    /// Statements issued by this frame.
    kind: FrameKind,
    /// True until the frame has been finished.
    pending: bool,
}

impl<'h> TransactionFrame<'h> {
    /// Opens a frame, issuing `BEGIN` or `SAVEPOINT` as needed.
    fn enter(handle: &'h DatabaseHandle, style: NestingStyle) -> Result<Self, SqliteAdapterError> {
        let mut depth = handle.lock_depth()?;
        let kind = match (*depth, style) {
            (0, _) => FrameKind::Root,
            (level, NestingStyle::Savepoint) => FrameKind::Savepoint(savepoint_name(level)),
            (_, NestingStyle::Shared) => FrameKind::Shared,
        };
        if let Some(sql) = kind.begin_sql() {
            handle.exec(&sql)?;
        }
        *depth = depth.saturating_add(1);
        Ok(Self {
            handle,
            kind,
            pending: true,
        })
    }

    /// Commits the frame. On failure the frame stays pending and is rolled
    /// back when dropped.
    fn commit(mut self) -> Result<(), SqliteAdapterError> {
        if let Some(sql) = self.kind.commit_sql() {
            self.handle.exec(&sql)?;
            self.handle.record(HandleOp::Commit);
        }
        self.pending = false;
        Ok(())
    }

    /// Rolls the frame back.
    fn rollback(mut self) -> Result<(), SqliteAdapterError> {
        self.pending = false;
        self.undo()
    }

    /// Issues the rollback statements for this frame. Nothing is issued when
    /// the engine has already rolled the whole transaction back.
    fn undo(&self) -> Result<(), SqliteAdapterError> {
        let Some(sql) = self.kind.rollback_sql() else {
            return Ok(());
        };
        if self.handle.exec_if_transaction_active(&sql)? {
            self.handle.record(HandleOp::Rollback);
        } else {
            tracing::warn!(
                database = %self.handle.name(),
                "transaction already ended by the engine, skipping rollback"
            );
        }
        Ok(())
    }
}

impl Drop for TransactionFrame<'_> {
    fn drop(&mut self) {
        if self.pending {
            tracing::warn!(database = %self.handle.name(), "rolling back abandoned transaction frame");
            if let Err(err) = self.undo() {
                tracing::warn!(
                    database = %self.handle.name(),
                    error = %err,
                    "rollback of abandoned transaction frame failed"
                );
            }
        }
        match self.handle.lock_depth() {
            Ok(mut depth) => *depth = depth.saturating_sub(1),
            Err(err) => {
                tracing::warn!(database = %self.handle.name(), error = %err, "transaction depth not released");
            }
        }
    }
}

/// Builds the timeout error for `limit`.
fn timeout_error(limit: Duration) -> SqliteAdapterError {
    SqliteAdapterError::TransactionTimeout {
        limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

impl DatabaseHandle {
    /// Returns the options used when a caller passes none.
    #[must_use]
    pub const fn default_transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            timeout: self.default_timeout(),
        }
    }

    /// Returns true while any transaction frame is open on this handle.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Lock`] when the depth mutex is poisoned.
    pub fn in_transaction(&self) -> Result<bool, SqliteAdapterError> {
        Ok(self.transaction_depth()? > 0)
    }

    /// Runs `body` inside a transaction, or a savepoint when nested.
    ///
    /// # Errors
    ///
    /// Returns the body's error after rollback, or the adapter error from a
    /// failed begin, commit, or rollback.
    pub fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<SqliteAdapterError>,
    {
        self.transaction_with(self.default_transaction_options(), body)
    }

    /// Like [`DatabaseHandle::transaction`] with explicit options. The
    /// deadline is checked when the body returns; an overrun rolls back and
    /// returns [`SqliteAdapterError::TransactionTimeout`].
    ///
    /// # Errors
    ///
    /// See [`DatabaseHandle::transaction`].
    pub fn transaction_with<T, E, F>(&self, options: TransactionOptions, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<SqliteAdapterError>,
    {
        let started = Instant::now();
        let frame = TransactionFrame::enter(self, NestingStyle::Savepoint)?;
        match body() {
            Ok(value) => {
                if let Some(limit) = options.timeout
                    && started.elapsed() > limit
                {
                    frame.rollback()?;
                    return Err(timeout_error(limit).into());
                }
                frame.commit()?;
                Ok(value)
            }
            Err(err) => {
                frame.rollback()?;
                Err(err)
            }
        }
    }

    /// Runs an asynchronous `body` inside a transaction. Only the outermost
    /// frame begins and commits; nested calls join it without a savepoint.
    ///
    /// # Errors
    ///
    /// See [`DatabaseHandle::transaction`].
    pub async fn async_transaction<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SqliteAdapterError>,
    {
        self.async_transaction_with(self.default_transaction_options(), body).await
    }

    /// Like [`DatabaseHandle::async_transaction`] with explicit options. The
    /// body is cancelled at the deadline and the transaction rolled back.
    ///
    /// # Errors
    ///
    /// See [`DatabaseHandle::transaction`].
    pub async fn async_transaction_with<T, E, F, Fut>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SqliteAdapterError>,
    {
        let frame = TransactionFrame::enter(self, NestingStyle::Shared)?;
        let outcome = match options.timeout {
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, body()).await {
                    outcome
                } else {
                    frame.rollback()?;
                    return Err(timeout_error(limit).into());
                }
            }
            None => body().await,
        };
        match outcome {
            Ok(value) => {
                frame.commit()?;
                Ok(value)
            }
            Err(err) => {
                frame.rollback()?;
                Err(err)
            }
        }
    }
}
