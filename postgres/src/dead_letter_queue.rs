//! Dead letter queue for payment messages that can never be processed.
//!
//! Undecodable messages are acknowledged on the bus so they stop blocking the
//! queue, and parked here for an operator to inspect, resolve or discard.

use crate::store_error;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use ticketsync_core::dead_letter::{DeadLetterSink, RejectedMessage};
use ticketsync_core::store::{StoreError, StoreFuture};

/// Status of a rejected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Handled, e.g. republished after a fix
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DLQStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRecord`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::InvalidRecord(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// A rejected message as stored.
#[derive(Debug, Clone)]
pub struct StoredRejection {
    /// Row id
    pub id: i64,
    /// The message itself
    pub message: RejectedMessage,
    /// Current status
    pub status: DLQStatus,
    /// When it left `pending`
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL` dead letter queue over the `rejected_messages` table.
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a queue over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a rejected message and return its row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the insert fails.
    pub async fn add_entry(&self, message: &RejectedMessage) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO rejected_messages (topic, payload, reason, rejected_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(&message.topic)
        .bind(&message.payload)
        .bind(&message.reason)
        .bind(message.rejected_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("Failed to store rejected message", &e))?;

        tracing::warn!(
            dlq_id = id,
            topic = %message.topic,
            reason = %message.reason,
            "Message added to dead letter queue"
        );

        metrics::counter!("ticket_dlq_added_total", "topic" => message.topic.clone())
            .increment(1);

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<StoredRejection>, StoreError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(
            r"
            SELECT id, topic, payload, reason, rejected_at, status,
                   resolved_at, resolution_notes
            FROM rejected_messages
            WHERE status = 'pending'
            ORDER BY rejected_at ASC
            LIMIT $1
            ",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list rejected messages", &e))?;

        rows.iter().map(Self::row_to_rejection).collect()
    }

    /// Mark an entry as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), StoreError> {
        self.close(id, DLQStatus::Resolved, notes).await?;
        tracing::info!(dlq_id = id, "DLQ entry marked as resolved");
        metrics::counter!("ticket_dlq_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry as permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        self.close(id, DLQStatus::Discarded, Some(reason)).await?;
        tracing::warn!(dlq_id = id, reason = reason, "DLQ entry marked as discarded");
        metrics::counter!("ticket_dlq_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rejected_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| store_error("Failed to count rejected messages", &e))?;
        Ok(count)
    }

    async fn close(&self, id: i64, status: DLQStatus, notes: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE rejected_messages
            SET status = $1, resolved_at = NOW(), resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to update rejected message", &e))?;
        Ok(())
    }

    fn row_to_rejection(row: &sqlx::postgres::PgRow) -> Result<StoredRejection, StoreError> {
        let decode = |e: sqlx::Error| StoreError::InvalidRecord(e.to_string());
        let status: String = row.try_get("status").map_err(decode)?;

        Ok(StoredRejection {
            id: row.try_get("id").map_err(decode)?,
            message: RejectedMessage {
                topic: row.try_get("topic").map_err(decode)?,
                payload: row.try_get("payload").map_err(decode)?,
                reason: row.try_get("reason").map_err(decode)?,
                rejected_at: row.try_get("rejected_at").map_err(decode)?,
            },
            status: DLQStatus::parse(&status)?,
            resolved_at: row.try_get("resolved_at").map_err(decode)?,
            resolution_notes: row.try_get("resolution_notes").map_err(decode)?,
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record(&self, message: &RejectedMessage) -> StoreFuture<'_, ()> {
        let message = message.clone();
        Box::pin(async move { self.add_entry(&message).await.map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[DLQStatus::Pending, DLQStatus::Resolved, DLQStatus::Discarded] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(matches!(
            DLQStatus::parse("processing"),
            Err(StoreError::InvalidRecord(_))
        ));
    }
}
