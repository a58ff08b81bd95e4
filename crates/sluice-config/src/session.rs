//! Per-connection session settings.

use std::time::Duration;

/// Statement timeout applied when a configuration carries none.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Fixed `lock_timeout` for every pooled connection.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Fixed `idle_in_transaction_session_timeout` for every pooled connection.
pub const IDLE_IN_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Session parameters applied to each newly established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// `statement_timeout`.
    pub statement_timeout: Duration,
    /// `lock_timeout`.
    pub lock_timeout: Duration,
    /// `idle_in_transaction_session_timeout`.
    pub idle_in_transaction_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::with_statement_timeout(DEFAULT_STATEMENT_TIMEOUT)
    }
}

impl SessionSettings {
    /// Settings with the given statement timeout and the fixed lock and
    /// idle-in-transaction timeouts.
    #[must_use]
    pub fn with_statement_timeout(statement_timeout: Duration) -> Self {
        let statement_timeout = if statement_timeout.is_zero() {
            DEFAULT_STATEMENT_TIMEOUT
        } else {
            statement_timeout
        };

        Self {
            statement_timeout,
            lock_timeout: LOCK_TIMEOUT,
            idle_in_transaction_timeout: IDLE_IN_TRANSACTION_TIMEOUT,
        }
    }

    /// The `SET` statements, in application order.
    #[must_use]
    pub fn statements(&self) -> [String; 3] {
        [
            format!("SET statement_timeout = {}", self.statement_timeout.as_millis()),
            format!("SET lock_timeout = {}", self.lock_timeout.as_millis()),
            format!(
                "SET idle_in_transaction_session_timeout = {}",
                self.idle_in_transaction_timeout.as_millis()
            ),
        ]
    }

    /// All statements joined into one batch.
    #[must_use]
    pub fn batch(&self) -> String {
        let mut sql = self.statements().join("; ");
        sql.push(';');
        sql
    }
}
