//! Transaction boundaries around provisioning operations.
//!
//! Each public operation runs in its own boundary, independent of whatever the
//! caller may already hold open. A captured pipeline failure rolls back that
//! boundary only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::error::BridgeResult;

/// Transaction boundary errors.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The boundary could not be opened.
    #[error("Failed to begin transaction: {reason}")]
    Begin { reason: String },

    /// Commit failed.
    #[error("Failed to commit transaction: {reason}")]
    Commit { reason: String },

    /// Rollback failed.
    #[error("Failed to roll back transaction: {reason}")]
    Rollback { reason: String },

    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Bookkeeping entry written inside a boundary before a request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Operation name, e.g. `createUser`.
    pub operation: String,

    /// Input channel the request is sent to.
    pub input: String,

    /// Reply channel awaited.
    pub reply: String,

    /// Acting user.
    pub actor: String,

    /// Calling context.
    pub context: String,

    /// When the request was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl DispatchRecord {
    /// Record a request about to be sent from `input` to `reply`.
    pub fn new(
        operation: impl Into<String>,
        input: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            input: input.into(),
            reply: reply.into(),
            actor: String::new(),
            context: String::new(),
            recorded_at: Utc::now(),
        }
    }

    /// Set who issued the request and from where.
    #[must_use]
    pub fn by(mut self, actor: impl Into<String>, context: impl Into<String>) -> Self {
        self.actor = actor.into();
        self.context = context.into();
        self
    }
}

/// An open transaction boundary.
#[async_trait]
pub trait Transaction: Send {
    /// Write a dispatch record. It is kept only if the boundary commits.
    async fn record(&mut self, record: DispatchRecord) -> Result<(), TransactionError>;

    /// Commit the work done inside the boundary.
    async fn commit(self: Box<Self>) -> Result<(), TransactionError>;

    /// Discard the work done inside the boundary.
    async fn rollback(self: Box<Self>) -> Result<(), TransactionError>;
}

/// Opens new, independent transaction boundaries.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a new boundary.
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError>;
}

/// Transaction manager for deployments without transactional bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransactionManager;

struct NoopTransaction;

#[async_trait]
impl Transaction for NoopTransaction {
    async fn record(&mut self, _record: DispatchRecord) -> Result<(), TransactionError> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for NoopTransactionManager {
    async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
        Ok(Box::new(NoopTransaction))
    }
}

/// A new transaction boundary around one provisioning operation.
///
/// Work is done through [`transaction`](Self::transaction); [`finish`](Self::finish)
/// commits when the operation succeeded and rolls back on any error.
pub struct TransactionBoundary {
    tx: Box<dyn Transaction>,
    operation: String,
}

impl TransactionBoundary {
    /// Open a boundary for `operation`.
    pub async fn begin(
        manager: &dyn TransactionManager,
        operation: impl Into<String>,
    ) -> BridgeResult<Self> {
        let tx = manager.begin().await?;
        Ok(Self {
            tx,
            operation: operation.into(),
        })
    }

    /// The open transaction.
    pub fn transaction(&mut self) -> &mut dyn Transaction {
        self.tx.as_mut()
    }

    /// Close the boundary according to `result` and hand it back.
    ///
    /// A failed rollback is logged and the operation's own error is returned.
    pub async fn finish<T>(self, result: BridgeResult<T>) -> BridgeResult<T> {
        let operation = self.operation;

        match result {
            Ok(value) => {
                self.tx.commit().await?;
                debug!(operation = %operation, "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.tx.rollback().await {
                    error!(
                        operation = %operation,
                        error = %rollback_err,
                        "Failed to roll back transaction"
                    );
                } else {
                    debug!(operation = %operation, error = %e, "Transaction rolled back");
                }
                Err(e)
            }
        }
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PgTransactionManager;

#[cfg(feature = "postgres")]
mod postgres {
    use async_trait::async_trait;
    use sqlx::{PgPool, Postgres};

    use super::{DispatchRecord, Transaction, TransactionError, TransactionManager};

    /// Transaction manager opening PostgreSQL transactions.
    ///
    /// Dispatch records go to the `provisioning_dispatch_log` table:
    ///
    /// ```sql
    /// CREATE TABLE provisioning_dispatch_log (
    ///     id            BIGSERIAL PRIMARY KEY,
    ///     operation     TEXT NOT NULL,
    ///     input_channel TEXT NOT NULL,
    ///     reply_channel TEXT NOT NULL,
    ///     actor         TEXT NOT NULL,
    ///     context       TEXT NOT NULL,
    ///     recorded_at   TIMESTAMPTZ NOT NULL
    /// );
    /// ```
    #[derive(Debug, Clone)]
    pub struct PgTransactionManager {
        pool: PgPool,
    }

    impl PgTransactionManager {
        /// Create a new manager.
        #[must_use]
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    struct PgTransaction {
        inner: sqlx::Transaction<'static, Postgres>,
    }

    #[async_trait]
    impl Transaction for PgTransaction {
        async fn record(&mut self, record: DispatchRecord) -> Result<(), TransactionError> {
            sqlx::query(
                r"
                INSERT INTO provisioning_dispatch_log
                    (operation, input_channel, reply_channel, actor, context, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(&record.operation)
            .bind(&record.input)
            .bind(&record.reply)
            .bind(&record.actor)
            .bind(&record.context)
            .bind(record.recorded_at)
            .execute(&mut *self.inner)
            .await?;

            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
            self.inner.commit().await?;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
            self.inner.rollback().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionManager for PgTransactionManager {
        async fn begin(&self) -> Result<Box<dyn Transaction>, TransactionError> {
            let inner = self.pool.begin().await?;
            Ok(Box::new(PgTransaction { inner }))
        }
    }
}
