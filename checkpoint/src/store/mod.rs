//! Ticket store abstraction and its backends.
//!
//! The validator never writes a ticket unconditionally. Every backend implements
//! [`TicketStore::conditional_update`] as a compare-and-swap evaluated by the store itself,
//! so two doors reading the same `VALID` ticket cannot both admit it.

pub mod memory;
pub mod postgres;
pub mod rest;

pub use memory::InMemoryTicketStore;
pub use postgres::PostgresTicketStore;
pub use rest::RestTicketStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::types::{Ticket, TicketId, TicketStatus, TicketUpdate};
use async_trait::async_trait;
use gatecheck_core::environment::Clock;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by ticket store backends.
///
/// All of them are transient from the door's point of view.
#[derive(Error, Debug)]
pub enum TicketStoreError {
    /// The store refused or could not take the request
    #[error("Ticket store unavailable: {0}")]
    Unavailable(String),

    /// Network or protocol failure talking to the store
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with something that is not a ticket
    #[error("Failed to decode ticket: {0}")]
    Decode(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

/// Result of a conditional update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The condition held and the update was written; carries the record as stored
    Applied(Ticket),
    /// The condition did not hold; carries the current record, if it still exists
    ConditionFailed(Option<Ticket>),
}

/// Access to ticket records.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fetch a ticket by identifier. `Ok(None)` means the ticket does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError`] if the store cannot be reached or answers garbage.
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError>;

    /// Apply `update` only if the ticket's status is still `expected` and it has not
    /// been removed. The check and the write are atomic with respect to other callers.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError`] if the store cannot be reached. A failed condition
    /// is not an error.
    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError>;

    /// Cheap connectivity check used by readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError`] if the store is not reachable.
    async fn health(&self) -> Result<(), TicketStoreError> {
        Ok(())
    }
}

/// Build the configured backend.
///
/// # Errors
///
/// Returns [`TicketStoreError`] if the backend cannot be initialised (database
/// unreachable, seed file unreadable, HTTP client construction failure).
pub async fn connect(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn TicketStore>, TicketStoreError> {
    match config.backend {
        StoreBackend::Memory => {
            let store = InMemoryTicketStore::new(clock);
            if let Some(path) = &config.seed_file {
                let loaded = store.seed_from_file(path).await?;
                tracing::info!(path = %path.display(), tickets = loaded, "Seeded in-memory ticket store");
            }
            Ok(Arc::new(store))
        },
        StoreBackend::Postgres => {
            let store = PostgresTicketStore::connect(&config.postgres).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        },
        StoreBackend::Rest => Ok(Arc::new(RestTicketStore::new(&config.rest)?)),
    }
}
