//! `PostgreSQL` ticket store.
//!
//! The compare-and-swap is a single `UPDATE ... WHERE status = ANY($expected) RETURNING`,
//! so the database decides which of two racing doors wins. The check-in time is the
//! database's `now()`, never the door's clock.

use super::{TicketStore, TicketStoreError, UpdateOutcome};
use crate::config::PostgresConfig;
use crate::types::{Ticket, TicketId, TicketStatus, TicketUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Row shape shared by every ticket query.
type TicketRow = (String, String, String, Option<DateTime<Utc>>, Option<String>, bool);

const TICKET_COLUMNS: &str =
    "ticket_id, status, buyer_name, check_in_timestamp, scanned_by, is_deleted";

/// Ticket store backed by a `tickets` table.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Database`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, TicketStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| TicketStoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `tickets` table if it does not exist.
    ///
    /// The CHECK constraint keeps the timestamp present exactly for checked-in tickets.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Database`] if the DDL fails.
    pub async fn migrate(&self) -> Result<(), TicketStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tickets (
                ticket_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                buyer_name TEXT NOT NULL DEFAULT '',
                check_in_timestamp TIMESTAMPTZ,
                scanned_by TEXT,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                CONSTRAINT check_in_timestamp_matches_status CHECK (
                    (status IN ('CHECKED_IN', 'CHECK_IN_REALIZADO')) = (check_in_timestamp IS NOT NULL)
                )
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TicketStoreError::Database(format!("Failed to create tickets table: {e}")))?;

        Ok(())
    }

    /// Insert or replace a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Database`] if the write fails, including when the
    /// record violates the timestamp constraint.
    pub async fn upsert(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        sqlx::query(
            r"
            INSERT INTO tickets (ticket_id, status, buyer_name, check_in_timestamp, scanned_by, is_deleted)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (ticket_id) DO UPDATE SET
                status = EXCLUDED.status,
                buyer_name = EXCLUDED.buyer_name,
                check_in_timestamp = EXCLUDED.check_in_timestamp,
                scanned_by = EXCLUDED.scanned_by,
                is_deleted = EXCLUDED.is_deleted
            ",
        )
        .bind(ticket.ticket_id.as_str())
        .bind(ticket.status.as_str())
        .bind(&ticket.buyer_name)
        .bind(ticket.check_in_timestamp)
        .bind(ticket.scanned_by.as_deref())
        .bind(ticket.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| TicketStoreError::Database(format!("Failed to upsert ticket: {e}")))?;

        Ok(())
    }
}

fn row_to_ticket(row: TicketRow) -> Result<Ticket, TicketStoreError> {
    let (ticket_id, status, buyer_name, check_in_timestamp, scanned_by, is_deleted) = row;
    let ticket_id = TicketId::parse(&ticket_id)
        .ok_or_else(|| TicketStoreError::Decode(format!("Invalid ticket id in row: {ticket_id:?}")))?;

    Ok(Ticket {
        ticket_id,
        status: TicketStatus::parse(&status),
        buyer_name,
        check_in_timestamp,
        scanned_by,
        is_deleted,
    })
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    #[tracing::instrument(skip(self), fields(ticket_id = %id))]
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TicketStoreError::Database(format!("Failed to load ticket: {e}")))?;

        row.map(row_to_ticket).transpose()
    }

    #[tracing::instrument(skip(self, update), fields(ticket_id = %id, expected = %expected))]
    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        let TicketUpdate::CheckIn { scanned_by } = update;

        let row: Option<TicketRow> = sqlx::query_as(&format!(
            r"
            UPDATE tickets
            SET status = $3, check_in_timestamp = now(), scanned_by = $4
            WHERE ticket_id = $1 AND status = ANY($2) AND NOT is_deleted
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(id.as_str())
        .bind(expected.stored_forms())
        .bind(TicketStatus::CheckedIn.as_str())
        .bind(scanned_by.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TicketStoreError::Database(format!("Failed to update ticket: {e}")))?;

        match row {
            Some(row) => Ok(UpdateOutcome::Applied(row_to_ticket(row)?)),
            None => Ok(UpdateOutcome::ConditionFailed(self.get(id).await?)),
        }
    }

    async fn health(&self) -> Result<(), TicketStoreError> {
        let _: (i32,) = sqlx::query_as("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TicketStoreError::Database(format!("Health check failed: {e}")))?;
        Ok(())
    }
}
