//! In-memory ticket store.
//!
//! Used by tests, demos and single-door deployments. The compare-and-swap is performed
//! under the write lock, so concurrent validations against one ticket serialise here.

use super::{TicketStore, TicketStoreError, UpdateOutcome};
use crate::types::{Ticket, TicketId, TicketStatus, TicketUpdate};
use async_trait::async_trait;
use gatecheck_core::environment::Clock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory ticket store backed by a `HashMap`.
#[derive(Clone)]
pub struct InMemoryTicketStore {
    tickets: Arc<RwLock<HashMap<TicketId, Ticket>>>,
    clock: Arc<dyn Clock>,
    outage: Arc<AtomicBool>,
}

impl InMemoryTicketStore {
    /// Create an empty store stamping check-ins with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tickets: Arc::new(RwLock::new(HashMap::new())),
            clock,
            outage: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Insert or replace a ticket.
    pub async fn insert(&self, ticket: Ticket) {
        self.tickets
            .write()
            .await
            .insert(ticket.ticket_id.clone(), ticket);
    }

    /// Snapshot of one ticket, bypassing outage simulation.
    pub async fn snapshot(&self, id: &TicketId) -> Option<Ticket> {
        self.tickets.read().await.get(id).cloned()
    }

    /// Number of tickets held.
    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    /// Whether the store holds no tickets.
    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }

    /// Simulate the store being unreachable. While set, every call fails.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Load tickets from a JSON array.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Decode`] if the JSON is not an array of tickets.
    pub async fn seed_from_json(&self, json: &str) -> Result<usize, TicketStoreError> {
        let tickets: Vec<Ticket> =
            serde_json::from_str(json).map_err(|e| TicketStoreError::Decode(e.to_string()))?;
        let count = tickets.len();

        let mut map = self.tickets.write().await;
        for ticket in tickets {
            if !ticket.is_consistent() {
                tracing::warn!(ticket_id = %ticket.ticket_id, status = %ticket.status, "Seeded ticket has inconsistent check-in timestamp");
            }
            map.insert(ticket.ticket_id.clone(), ticket);
        }
        Ok(count)
    }

    /// Load tickets from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`TicketStoreError::Unavailable`] if the file cannot be read and
    /// [`TicketStoreError::Decode`] if its content is not an array of tickets.
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, TicketStoreError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            TicketStoreError::Unavailable(format!("Failed to read seed file {}: {e}", path.display()))
        })?;
        self.seed_from_json(&json).await
    }

    fn check_available(&self) -> Result<(), TicketStoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(TicketStoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        self.check_available()?;
        Ok(self.tickets.read().await.get(id).cloned())
    }

    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        self.check_available()?;

        let mut tickets = self.tickets.write().await;
        let Some(ticket) = tickets.get_mut(id) else {
            return Ok(UpdateOutcome::ConditionFailed(None));
        };

        if !ticket.matches_expected(expected) {
            return Ok(UpdateOutcome::ConditionFailed(Some(ticket.clone())));
        }

        ticket.apply(update, self.clock.now());
        Ok(UpdateOutcome::Applied(ticket.clone()))
    }

    async fn health(&self) -> Result<(), TicketStoreError> {
        self.check_available()
    }
}
