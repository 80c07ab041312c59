//! Validation engine.
//!
//! Turns one decoded code into exactly one [`ValidationOutcome`]. The only write is the
//! `VALID → CHECKED_IN` conditional update; every failure, including store outages and
//! timeouts, is folded into [`OutcomeKind::SystemError`] instead of being returned.

use crate::config::ValidationConfig;
use crate::metrics;
use crate::presentation::Severity;
use crate::store::{TicketStore, TicketStoreError, UpdateOutcome};
use crate::types::{Ticket, TicketId, TicketStatus, TicketUpdate};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Classification of a scanned code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The ticket was checked in by this scan
    Admitted,
    /// The ticket had already been checked in
    AlreadyUsed,
    /// The ticket was cancelled or deleted
    Revoked,
    /// No ticket with this code exists, or the code is malformed
    NotFound,
    /// The ticket has a status this validator does not handle
    UnknownStatus,
    /// The store could not be reached; the operator may retry
    SystemError,
}

impl OutcomeKind {
    /// Display bucket for this outcome.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Admitted => Severity::Success,
            Self::AlreadyUsed => Severity::Warning,
            Self::Revoked | Self::NotFound | Self::UnknownStatus | Self::SystemError => {
                Severity::Error
            },
        }
    }

    /// Whether scanning the same code again may give a different answer.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::SystemError)
    }

    /// Label used on the `outcome` metric dimension.
    #[must_use]
    pub const fn metric_label(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::AlreadyUsed => "already_used",
            Self::Revoked => "revoked",
            Self::NotFound => "not_found",
            Self::UnknownStatus => "unknown_status",
            Self::SystemError => "system_error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.metric_label())
    }
}

/// What the operator is shown for one scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Classification
    pub kind: OutcomeKind,
    /// Short headline
    pub headline: String,
    /// One line of detail
    pub detail: String,
    /// Buyer name, when the ticket has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,
    /// Normalised code, absent when it was malformed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<TicketId>,
}

impl ValidationOutcome {
    fn new(kind: OutcomeKind, headline: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            headline: headline.to_string(),
            detail: detail.into(),
            buyer_name: None,
            ticket_id: None,
        }
    }

    fn for_ticket(mut self, ticket: &Ticket) -> Self {
        self.ticket_id = Some(ticket.ticket_id.clone());
        if !ticket.buyer_name.is_empty() {
            self.buyer_name = Some(ticket.buyer_name.clone());
        }
        self
    }

    /// Outcome for a code that names no ticket.
    #[must_use]
    pub fn not_found(id: Option<&TicketId>) -> Self {
        let mut outcome = Self::new(OutcomeKind::NotFound, "Invalid Ticket", "This code was not found.");
        outcome.ticket_id = id.cloned();
        outcome
    }

    /// Outcome for a failed store round trip.
    #[must_use]
    pub fn system_error(id: Option<&TicketId>) -> Self {
        let mut outcome = Self::new(OutcomeKind::SystemError, "System Error", "Check your connection.");
        outcome.ticket_id = id.cloned();
        outcome
    }

    /// Severity bucket of [`Self::kind`].
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

/// Why a validation attempt ended without a classification.
#[derive(Debug)]
enum Interrupted {
    Store(TicketStoreError),
    TimedOut(Duration),
}

impl From<TicketStoreError> for Interrupted {
    fn from(error: TicketStoreError) -> Self {
        Self::Store(error)
    }
}

/// Validates scanned codes against a [`TicketStore`].
#[derive(Clone)]
pub struct ValidationEngine {
    store: Arc<dyn TicketStore>,
    display_offset: FixedOffset,
    timeout: Option<Duration>,
}

impl ValidationEngine {
    /// Engine with no timeout, rendering times in UTC.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self {
            store,
            display_offset: Utc.fix(),
            timeout: None,
        }
    }

    /// Engine configured from [`ValidationConfig`].
    #[must_use]
    pub fn from_config(store: Arc<dyn TicketStore>, config: &ValidationConfig) -> Self {
        Self {
            store,
            display_offset: config.display_offset,
            timeout: config.timeout,
        }
    }

    /// Render check-in times at `offset` (builder style).
    #[must_use]
    pub fn with_display_offset(mut self, offset: FixedOffset) -> Self {
        self.display_offset = offset;
        self
    }

    /// Give up after `timeout` and report a system error (builder style).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The store this engine validates against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    /// Validate one scanned code, checking the ticket in when it is `VALID`.
    ///
    /// Never fails: store errors and timeouts become [`OutcomeKind::SystemError`].
    #[tracing::instrument(skip(self, raw, operator), fields(code = %raw.trim(), operator = operator.unwrap_or("-")))]
    pub async fn validate(&self, raw: &str, operator: Option<&str>) -> ValidationOutcome {
        let start = Instant::now();

        let outcome = match TicketId::parse(raw) {
            None => {
                tracing::debug!("Malformed code");
                ValidationOutcome::not_found(None)
            },
            Some(id) => match self.validate_with_timeout(&id, operator).await {
                Ok(outcome) => outcome,
                Err(Interrupted::Store(error)) => {
                    tracing::warn!(ticket_id = %id, %error, "Ticket store failure during validation");
                    ValidationOutcome::system_error(Some(&id))
                },
                Err(Interrupted::TimedOut(after)) => {
                    tracing::warn!(ticket_id = %id, ?after, "Validation timed out");
                    ValidationOutcome::system_error(Some(&id))
                },
            },
        };

        metrics::record_scan(outcome.kind, start.elapsed().as_secs_f64());
        tracing::info!(kind = %outcome.kind, "Validation finished");
        outcome
    }

    async fn validate_with_timeout(
        &self,
        id: &TicketId,
        operator: Option<&str>,
    ) -> Result<ValidationOutcome, Interrupted> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.check_in(id, operator))
                .await
                .map_err(|_| Interrupted::TimedOut(limit))?,
            None => self.check_in(id, operator).await,
        }
    }

    async fn check_in(
        &self,
        id: &TicketId,
        operator: Option<&str>,
    ) -> Result<ValidationOutcome, Interrupted> {
        let Some(ticket) = self.store.get(id).await? else {
            return Ok(ValidationOutcome::not_found(Some(id)));
        };

        if !ticket.is_consistent() {
            tracing::warn!(
                ticket_id = %id,
                status = %ticket.status,
                has_timestamp = ticket.check_in_timestamp.is_some(),
                "Ticket record violates the check-in timestamp invariant"
            );
        }

        if !ticket.matches_expected(&TicketStatus::Valid) {
            return Ok(self.classify(&ticket));
        }

        let update = TicketUpdate::check_in(operator);
        match self
            .store
            .conditional_update(id, &TicketStatus::Valid, &update)
            .await?
        {
            UpdateOutcome::Applied(stored) => Ok(ValidationOutcome::new(
                OutcomeKind::Admitted,
                "Entry Granted",
                stored.buyer_name.clone(),
            )
            .for_ticket(&stored)),
            UpdateOutcome::ConditionFailed(current) => {
                metrics::record_check_in_conflict();
                tracing::info!(ticket_id = %id, "Lost check-in race to a concurrent scan");
                Ok(current.map_or_else(
                    || ValidationOutcome::not_found(Some(id)),
                    |ticket| self.classify(&ticket),
                ))
            },
        }
    }

    /// Classify a ticket that this scan will not check in.
    fn classify(&self, ticket: &Ticket) -> ValidationOutcome {
        if ticket.is_removed() {
            return ValidationOutcome::new(
                OutcomeKind::Revoked,
                "Ticket Deleted",
                "This ticket was removed by the organizer.",
            )
            .for_ticket(ticket);
        }

        match &ticket.status {
            // A VALID record only gets here after the conditional update failed,
            // which means another door is admitting it right now.
            TicketStatus::CheckedIn | TicketStatus::Valid => ValidationOutcome::new(
                OutcomeKind::AlreadyUsed,
                "Ticket Already Used",
                self.already_used_detail(ticket),
            )
            .for_ticket(ticket),
            TicketStatus::Cancelled => ValidationOutcome::new(
                OutcomeKind::Revoked,
                "Ticket Cancelled",
                ticket.buyer_name.clone(),
            )
            .for_ticket(ticket),
            TicketStatus::Deleted => ValidationOutcome::new(
                OutcomeKind::Revoked,
                "Ticket Deleted",
                "This ticket was removed by the organizer.",
            )
            .for_ticket(ticket),
            TicketStatus::Unrecognized(status) => {
                tracing::warn!(ticket_id = %ticket.ticket_id, %status, "Unrecognized ticket status");
                ValidationOutcome::new(OutcomeKind::UnknownStatus, "Unknown Status", "Contact support.")
                    .for_ticket(ticket)
            },
        }
    }

    fn already_used_detail(&self, ticket: &Ticket) -> String {
        let at = ticket
            .check_in_timestamp
            .map_or_else(|| "N/A".to_string(), |at| self.time_of_day(at));
        match ticket.scanned_by.as_deref() {
            Some(operator) if !operator.is_empty() => format!("Checked in at {at} by {operator}"),
            _ => format!("Checked in at {at}"),
        }
    }

    /// Render a check-in instant as `HH:MM:SS` at the display offset.
    #[must_use]
    pub fn time_of_day(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.display_offset)
            .format("%H:%M:%S")
            .to_string()
    }
}

impl fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("display_offset", &self.display_offset)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryTicketStore;
    use chrono::TimeZone;
    use gatecheck_testing::FixedClock;

    fn id(raw: &str) -> TicketId {
        TicketId::parse(raw).unwrap()
    }

    async fn engine_with(tickets: Vec<Ticket>) -> (ValidationEngine, InMemoryTicketStore) {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 20, 15, 30).unwrap());
        let store = InMemoryTicketStore::new(Arc::new(clock));
        for ticket in tickets {
            store.insert(ticket).await;
        }
        (ValidationEngine::new(Arc::new(store.clone())), store)
    }

    #[test]
    fn severity_buckets() {
        assert_eq!(OutcomeKind::Admitted.severity(), Severity::Success);
        assert_eq!(OutcomeKind::AlreadyUsed.severity(), Severity::Warning);
        for kind in [
            OutcomeKind::Revoked,
            OutcomeKind::NotFound,
            OutcomeKind::UnknownStatus,
            OutcomeKind::SystemError,
        ] {
            assert_eq!(kind.severity(), Severity::Error);
        }
        assert!(OutcomeKind::SystemError.is_retriable());
        assert!(!OutcomeKind::NotFound.is_retriable());
    }

    #[tokio::test]
    async fn admits_and_stamps_store_time() {
        let (engine, store) =
            engine_with(vec![Ticket::new(id("t-1"), TicketStatus::Valid, "Ana Costa")]).await;

        let outcome = engine.validate("  t-1 ", Some("Gate A")).await;

        assert_eq!(outcome.kind, OutcomeKind::Admitted);
        assert_eq!(outcome.headline, "Entry Granted");
        assert_eq!(outcome.buyer_name.as_deref(), Some("Ana Costa"));

        let stored = store.snapshot(&id("t-1")).await.unwrap();
        assert_eq!(stored.status, TicketStatus::CheckedIn);
        assert_eq!(stored.check_in_timestamp, Some(Utc.with_ymd_and_hms(2025, 1, 1, 20, 15, 30).unwrap()));
        assert_eq!(stored.scanned_by.as_deref(), Some("Gate A"));
    }

    #[tokio::test]
    async fn already_used_names_time_and_operator() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 21, 5, 9).unwrap();
        let mut ticket = Ticket::new(id("t-2"), TicketStatus::CheckedIn, "Ana").with_check_in(at);
        ticket.scanned_by = Some("Gate B".to_string());
        let (engine, _) = engine_with(vec![ticket]).await;

        let outcome = engine
            .with_display_offset(FixedOffset::west_opt(3 * 3600).unwrap())
            .validate("t-2", None)
            .await;

        assert_eq!(outcome.kind, OutcomeKind::AlreadyUsed);
        assert_eq!(outcome.detail, "Checked in at 18:05:09 by Gate B");
    }

    #[tokio::test]
    async fn deleted_flag_revokes_even_when_valid() {
        let ticket = Ticket::new(id("t-3"), TicketStatus::Valid, "Ana").deleted();
        let (engine, store) = engine_with(vec![ticket]).await;

        let outcome = engine.validate("t-3", None).await;

        assert_eq!(outcome.kind, OutcomeKind::Revoked);
        assert_eq!(outcome.headline, "Ticket Deleted");
        assert_eq!(store.snapshot(&id("t-3")).await.unwrap().status, TicketStatus::Valid);
    }

    #[tokio::test]
    async fn unrecognized_status_is_unknown() {
        let ticket = Ticket::new(
            id("t-4"),
            TicketStatus::Unrecognized("REEMBOLSADO".to_string()),
            "Ana",
        );
        let (engine, _) = engine_with(vec![ticket]).await;

        let outcome = engine.validate("t-4", None).await;
        assert_eq!(outcome.kind, OutcomeKind::UnknownStatus);
        assert_eq!(outcome.detail, "Contact support.");
    }

    #[tokio::test]
    async fn malformed_code_is_not_found() {
        let (engine, _) = engine_with(vec![]).await;
        for raw in ["", "   ", "a/b"] {
            let outcome = engine.validate(raw, None).await;
            assert_eq!(outcome.kind, OutcomeKind::NotFound);
            assert!(outcome.ticket_id.is_none());
        }
    }

    #[test]
    fn outcome_json_shape() {
        let outcome = ValidationOutcome::system_error(None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "SYSTEM_ERROR",
                "headline": "System Error",
                "detail": "Check your connection."
            })
        );
    }
}
