//! Transaction coordination shared by every backend.
//!
//! A session moves through `Idle -> InTransaction -> {Committed | Aborted}`.
//! [`with_transaction`] brackets a body with begin and commit, aborts on
//! error, and with [`TransactionOptions::retry_on_conflict`] restarts the
//! whole attempt when the backend reports a conflict:
//!
//! ```text
//! loop {
//!     begin(isolation)
//!     body(session)  --Err--> abort --conflict & retry--> next attempt
//!     commit         --Err--> ------ conflict & retry --> next attempt
//! }
//! ```
//!
//! Dropping the future of an attempt before it finishes leaves the session
//! `Aborted`; the driver rolls the backend transaction back.

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::error::DbError;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// The backend's default.
    #[default]
    Default,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read (snapshot reads on document stores).
    Repeatable,
    /// Serializable.
    Serializable,
}

impl IsolationLevel {
    /// The SQL name of the level, `None` for the backend default.
    pub const fn sql(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::Repeatable => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }
}

/// Options for [`with_transaction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionOptions {
    /// Isolation level of each attempt.
    #[serde(default)]
    pub isolation: IsolationLevel,
    /// Restart the attempt when the backend reports a conflict.
    #[serde(default)]
    pub retry_on_conflict: bool,
    /// Upper bound on attempts when retrying; unbounded when `None`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl TransactionOptions {
    /// Default isolation, no retry.
    pub const fn new() -> Self {
        Self {
            isolation: IsolationLevel::Default,
            retry_on_conflict: false,
            max_attempts: None,
        }
    }

    /// Set the isolation level.
    #[must_use]
    pub const fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Enable or disable retry on conflict.
    #[must_use]
    pub const fn with_retry_on_conflict(mut self, retry: bool) -> Self {
        self.retry_on_conflict = retry;
        self
    }

    /// Bound the number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Where a session stands with respect to its transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started.
    #[default]
    Idle,
    /// A transaction is open.
    InTransaction,
    /// The last transaction committed.
    Committed,
    /// The last transaction was rolled back or abandoned.
    Aborted,
}

/// A session that can run transactions.
#[allow(async_fn_in_trait)]
pub trait Transactional {
    /// Current state.
    fn transaction_state(&self) -> TransactionState;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TransactionDeadlocks`] if one is already open, or
    /// the backend error.
    async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<(), DbError>;

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the session is then `Aborted`.
    async fn commit_transaction(&mut self) -> Result<(), DbError>;

    /// Roll back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the session is `Aborted` either way.
    async fn abort_transaction(&mut self) -> Result<(), DbError>;

    /// Forget the open transaction without a round trip, leaving the rollback
    /// to the driver. Used when an attempt is cancelled.
    fn discard_transaction(&mut self);

    /// Whether `error` should restart the transaction.
    fn is_conflict(&self, error: &DbError) -> bool {
        error.is_conflict()
    }
}

/// Run `body` inside a transaction on `session`.
///
/// # Errors
///
/// Returns [`DbError::TransactionDeadlocks`] if `session` is already in a
/// transaction, the body's error after aborting, or the commit error. With
/// `retry_on_conflict`, conflict errors restart the attempt until it
/// succeeds or `max_attempts` is reached.
pub async fn with_transaction<C, T, F>(
    session: &mut C,
    options: &TransactionOptions,
    mut body: F,
) -> Result<T, DbError>
where
    C: Transactional,
    F: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, Result<T, DbError>>,
{
    if session.transaction_state() == TransactionState::InTransaction {
        return Err(DbError::TransactionDeadlocks);
    }

    let mut attempt: u32 = 1;
    loop {
        let error = match run_attempt(session, options.isolation, &mut body).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let may_retry = options.retry_on_conflict
            && session.is_conflict(&error)
            && options.max_attempts.is_none_or(|max| attempt < max);
        if !may_retry {
            return Err(error);
        }
        tracing::warn!(
            attempt,
            isolation = ?options.isolation,
            error = %error,
            "Transaction conflict, retrying"
        );
        attempt = attempt.saturating_add(1);
    }
}

/// Rolls the session back when an attempt is dropped mid-flight.
struct AttemptGuard<'s, C: Transactional> {
    session: &'s mut C,
    settled: bool,
}

impl<C: Transactional> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if !self.settled && self.session.transaction_state() == TransactionState::InTransaction {
            tracing::debug!("Transaction attempt dropped, discarding");
            self.session.discard_transaction();
        }
    }
}

async fn run_attempt<C, T, F>(
    session: &mut C,
    isolation: IsolationLevel,
    body: &mut F,
) -> Result<T, DbError>
where
    C: Transactional,
    F: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, Result<T, DbError>>,
{
    session.begin_transaction(isolation).await?;
    let mut guard = AttemptGuard {
        session,
        settled: false,
    };

    match body(&mut *guard.session).await {
        Ok(value) => {
            guard.session.commit_transaction().await?;
            guard.settled = true;
            Ok(value)
        }
        Err(error) => {
            if let Err(abort_error) = guard.session.abort_transaction().await {
                tracing::warn!(
                    error = %abort_error,
                    "Abort after failed transaction body failed"
                );
            }
            guard.settled = true;
            Err(error)
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use futures::FutureExt as _;

    use super::*;

    /// In-memory session: a counter with snapshot semantics and scripted
    /// conflicts.
    #[derive(Debug, Default)]
    struct FakeSession {
        state: TransactionState,
        committed: i64,
        working: i64,
        conflicts_left: u32,
        begins: u32,
        aborts: u32,
        discards: u32,
    }

    impl Transactional for FakeSession {
        fn transaction_state(&self) -> TransactionState {
            self.state
        }

        async fn begin_transaction(&mut self, _isolation: IsolationLevel) -> Result<(), DbError> {
            if self.state == TransactionState::InTransaction {
                return Err(DbError::TransactionDeadlocks);
            }
            self.state = TransactionState::InTransaction;
            self.working = self.committed;
            self.begins += 1;
            Ok(())
        }

        async fn commit_transaction(&mut self) -> Result<(), DbError> {
            if self.conflicts_left > 0 {
                self.conflicts_left -= 1;
                self.state = TransactionState::Aborted;
                return Err(DbError::TransactionConflict);
            }
            self.committed = self.working;
            self.state = TransactionState::Committed;
            Ok(())
        }

        async fn abort_transaction(&mut self) -> Result<(), DbError> {
            self.state = TransactionState::Aborted;
            self.aborts += 1;
            Ok(())
        }

        fn discard_transaction(&mut self) {
            self.state = TransactionState::Aborted;
            self.discards += 1;
        }
    }

    fn increment(session: &mut FakeSession) -> BoxFuture<'_, Result<i64, DbError>> {
        Box::pin(async move {
            session.working += 1;
            Ok(session.working)
        })
    }

    fn retrying() -> TransactionOptions {
        TransactionOptions::new()
            .with_isolation(IsolationLevel::Serializable)
            .with_retry_on_conflict(true)
    }

    #[tokio::test]
    async fn commits_the_body_result() {
        let mut session = FakeSession::default();
        let result = with_transaction(&mut session, &TransactionOptions::new(), increment).await;
        assert!(matches!(result, Ok(1)));
        assert_eq!(session.committed, 1);
        assert_eq!(session.state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn conflicts_restart_the_whole_attempt() {
        let mut session = FakeSession {
            conflicts_left: 3,
            ..FakeSession::default()
        };
        let result = with_transaction(&mut session, &retrying(), increment).await;
        assert!(matches!(result, Ok(1)));
        assert_eq!(session.begins, 4);
        assert_eq!(session.committed, 1);
    }

    #[tokio::test]
    async fn conflicts_are_returned_without_retry() {
        let mut session = FakeSession {
            conflicts_left: 1,
            ..FakeSession::default()
        };
        let result = with_transaction(&mut session, &TransactionOptions::new(), increment).await;
        assert!(matches!(result, Err(DbError::TransactionConflict)));
        assert_eq!(session.begins, 1);
        assert_eq!(session.committed, 0);
    }

    #[tokio::test]
    async fn max_attempts_bounds_the_retry() {
        let mut session = FakeSession {
            conflicts_left: 10,
            ..FakeSession::default()
        };
        let options = retrying().with_max_attempts(3);
        let result = with_transaction(&mut session, &options, increment).await;
        assert!(matches!(result, Err(DbError::TransactionConflict)));
        assert_eq!(session.begins, 3);
    }

    #[tokio::test]
    async fn other_errors_abort_and_propagate() {
        let mut session = FakeSession::default();
        let result: Result<(), DbError> = with_transaction(&mut session, &retrying(), |session| {
            Box::pin(async move {
                session.working += 5;
                Err(DbError::KeyNotFound("missing".to_owned()))
            })
        })
        .await;
        assert!(matches!(result, Err(DbError::KeyNotFound(_))));
        assert_eq!(session.begins, 1);
        assert_eq!(session.aborts, 1);
        assert_eq!(session.committed, 0);
        assert_eq!(session.state, TransactionState::Aborted);
    }

    #[tokio::test]
    async fn nested_transactions_deadlock() {
        let mut session = FakeSession {
            state: TransactionState::InTransaction,
            ..FakeSession::default()
        };
        let result = with_transaction(&mut session, &retrying(), increment).await;
        assert!(matches!(result, Err(DbError::TransactionDeadlocks)));
        assert_eq!(session.begins, 0);
    }

    #[tokio::test]
    async fn session_is_reusable_after_commit() {
        let mut session = FakeSession::default();
        for expected in 1..=3 {
            let result = with_transaction(&mut session, &retrying(), increment).await;
            assert!(matches!(result, Ok(value) if value == expected));
        }
        assert_eq!(session.committed, 3);
    }

    #[test]
    fn cancelled_attempt_leaves_session_aborted() {
        let mut session = FakeSession::default();
        let options = TransactionOptions::new();
        let attempt = with_transaction(&mut session, &options, |_session| {
            Box::pin(futures::future::pending::<Result<(), DbError>>())
        });
        // Polls once: begin completes, the body stays pending, then drops.
        assert!(attempt.now_or_never().is_none());
        assert_eq!(session.state, TransactionState::Aborted);
        assert_eq!(session.discards, 1);
        assert_eq!(session.committed, 0);
    }

    #[test]
    fn isolation_names() {
        assert_eq!(IsolationLevel::Default.sql(), None);
        assert_eq!(IsolationLevel::Repeatable.sql(), Some("REPEATABLE READ"));
        assert_eq!(IsolationLevel::Serializable.sql(), Some("SERIALIZABLE"));
    }
}
