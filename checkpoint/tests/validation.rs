//! Validation engine behaviour against in-memory and wrapped ticket stores.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use checkpoint::store::{InMemoryTicketStore, TicketStore, TicketStoreError, UpdateOutcome};
use checkpoint::{OutcomeKind, Ticket, TicketId, TicketStatus, TicketUpdate, ValidationEngine};
use futures::future::join_all;
use gatecheck_core::environment::Clock;
use gatecheck_testing::{test_clock, FixedClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn id(raw: &str) -> TicketId {
    TicketId::parse(raw).unwrap()
}

fn store() -> InMemoryTicketStore {
    InMemoryTicketStore::new(Arc::new(test_clock()))
}

async fn store_with(tickets: Vec<Ticket>) -> InMemoryTicketStore {
    let store = store();
    for ticket in tickets {
        store.insert(ticket).await;
    }
    store
}

fn engine(store: &InMemoryTicketStore) -> ValidationEngine {
    ValidationEngine::new(Arc::new(store.clone()))
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, h, m, s).unwrap()
}

// ============================================================================
// Classification
// ============================================================================

#[tokio::test]
async fn valid_ticket_is_admitted_then_already_used() {
    let store = store_with(vec![Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana Souza")]).await;
    let engine = engine(&store);

    let first = engine.validate("ABC123", Some("Gate A")).await;
    assert_eq!(first.kind, OutcomeKind::Admitted);
    assert_eq!(first.headline, "Entry Granted");
    assert_eq!(first.detail, "Ana Souza");
    assert_eq!(first.buyer_name.as_deref(), Some("Ana Souza"));

    let stored = store.snapshot(&id("ABC123")).await.unwrap();
    assert_eq!(stored.status, TicketStatus::CheckedIn);
    assert_eq!(stored.check_in_timestamp, Some(test_clock().now()));
    assert_eq!(stored.scanned_by.as_deref(), Some("Gate A"));

    let second = engine.validate("ABC123", Some("Gate B")).await;
    assert_eq!(second.kind, OutcomeKind::AlreadyUsed);
    assert_eq!(second.headline, "Ticket Already Used");
    assert_eq!(second.detail, "Checked in at 20:15:30 by Gate A");

    // The second scan wrote nothing
    assert_eq!(store.snapshot(&id("ABC123")).await.unwrap(), stored);
}

#[tokio::test]
async fn input_is_trimmed_before_lookup() {
    let store = store_with(vec![Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana")]).await;

    let outcome = engine(&store).validate("  ABC123\n", None).await;

    assert_eq!(outcome.kind, OutcomeKind::Admitted);
    assert_eq!(outcome.ticket_id, Some(id("ABC123")));
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let store = store_with(vec![Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana")]).await;

    let outcome = engine(&store).validate("does-not-exist-123", None).await;

    assert_eq!(outcome.kind, OutcomeKind::NotFound);
    assert_eq!(outcome.headline, "Invalid Ticket");
    assert_eq!(outcome.detail, "This code was not found.");
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn malformed_codes_are_not_found_without_a_lookup() {
    let store = store();
    store.set_outage(true);
    let engine = engine(&store);

    // Not even a store call is made, so the outage never shows
    for raw in ["", "   ", "a/b", "tab\tinside"] {
        let outcome = engine.validate(raw, None).await;
        assert_eq!(outcome.kind, OutcomeKind::NotFound, "input {raw:?}");
        assert_eq!(outcome.ticket_id, None);
    }
}

#[tokio::test]
async fn legacy_cancelled_ticket_is_revoked() {
    let store = store_with(vec![Ticket::new(
        id("T-9"),
        TicketStatus::parse("CANCELADO"),
        "Maria Silva",
    )])
    .await;

    let outcome = engine(&store).validate("T-9", None).await;

    assert_eq!(outcome.kind, OutcomeKind::Revoked);
    assert_eq!(outcome.headline, "Ticket Cancelled");
    assert!(outcome.detail.contains("Maria Silva"));
    assert_eq!(store.snapshot(&id("T-9")).await.unwrap().status, TicketStatus::Cancelled);
}

#[tokio::test]
async fn deleted_tickets_are_revoked_by_status_or_flag() {
    let store = store_with(vec![
        Ticket::new(id("by-status"), TicketStatus::parse("EXCLUIDO"), "Ana"),
        Ticket::new(id("by-flag"), TicketStatus::Valid, "Bia").deleted(),
    ])
    .await;
    let engine = engine(&store);

    for code in ["by-status", "by-flag"] {
        let outcome = engine.validate(code, None).await;
        assert_eq!(outcome.kind, OutcomeKind::Revoked, "{code}");
        assert_eq!(outcome.headline, "Ticket Deleted");
        assert_eq!(outcome.detail, "This ticket was removed by the organizer.");
    }

    // A soft-deleted VALID ticket is never checked in
    let flagged = store.snapshot(&id("by-flag")).await.unwrap();
    assert_eq!(flagged.status, TicketStatus::Valid);
    assert_eq!(flagged.check_in_timestamp, None);
}

#[tokio::test]
async fn already_used_shows_time_or_placeholder() {
    let store = store_with(vec![
        Ticket::new(id("timed"), TicketStatus::parse("CHECK_IN_REALIZADO"), "Ana")
            .with_check_in(at(18, 5, 9)),
        Ticket::new(id("untimed"), TicketStatus::CheckedIn, "Bia"),
    ])
    .await;
    let engine = engine(&store);

    let timed = engine.validate("timed", None).await;
    assert_eq!(timed.kind, OutcomeKind::AlreadyUsed);
    assert_eq!(timed.detail, "Checked in at 18:05:09");

    let untimed = engine.validate("untimed", None).await;
    assert_eq!(untimed.kind, OutcomeKind::AlreadyUsed);
    assert_eq!(untimed.detail, "Checked in at N/A");
}

#[tokio::test]
async fn check_in_time_uses_display_offset() {
    let store = store_with(vec![
        Ticket::new(id("timed"), TicketStatus::CheckedIn, "Ana").with_check_in(at(18, 5, 9)),
    ])
    .await;
    let sao_paulo = FixedOffset::west_opt(3 * 3600).unwrap();

    let outcome = engine(&store)
        .with_display_offset(sao_paulo)
        .validate("timed", None)
        .await;

    assert_eq!(outcome.detail, "Checked in at 15:05:09");
}

#[tokio::test]
async fn unrecognized_status_is_reported_and_untouched() {
    let store = store_with(vec![Ticket::new(id("odd"), TicketStatus::parse("REFUNDED"), "Ana")]).await;

    let outcome = engine(&store).validate("odd", None).await;

    assert_eq!(outcome.kind, OutcomeKind::UnknownStatus);
    assert_eq!(outcome.headline, "Unknown Status");
    assert_eq!(outcome.detail, "Contact support.");
    assert_eq!(
        store.snapshot(&id("odd")).await.unwrap().status,
        TicketStatus::Unrecognized("REFUNDED".to_string())
    );
}

#[tokio::test]
async fn legacy_valid_ticket_is_written_back_canonical() {
    let store = store_with(vec![Ticket::new(id("old"), TicketStatus::parse("VALIDO"), "Ana")]).await;

    let outcome = engine(&store).validate("old", None).await;

    assert_eq!(outcome.kind, OutcomeKind::Admitted);
    let stored = store.snapshot(&id("old")).await.unwrap();
    assert_eq!(String::from(stored.status), "CHECKED_IN");
    assert_eq!(stored.scanned_by, None);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_admit_exactly_once() {
    let store = store_with(vec![Ticket::new(id("RACE"), TicketStatus::Valid, "Ana")]).await;
    let engine = engine(&store);

    let doors = (0..16).map(|door| {
        let engine = engine.clone();
        tokio::spawn(async move {
            let operator = format!("door-{door}");
            engine.validate("RACE", Some(&operator)).await
        })
    });
    let outcomes: Vec<_> = join_all(doors).await.into_iter().map(Result::unwrap).collect();

    let admitted = outcomes.iter().filter(|o| o.kind == OutcomeKind::Admitted).count();
    let duplicates = outcomes.iter().filter(|o| o.kind == OutcomeKind::AlreadyUsed).count();
    assert_eq!(admitted, 1);
    assert_eq!(duplicates, 15);
}

/// Serves a stale `VALID` read once, as if another door checked the ticket in between
/// the read and the write.
struct StaleReads {
    inner: InMemoryTicketStore,
    stale: Ticket,
    served: AtomicBool,
}

#[async_trait]
impl TicketStore for StaleReads {
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        if !self.served.swap(true, Ordering::SeqCst) {
            return Ok(Some(self.stale.clone()));
        }
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        self.inner.conditional_update(id, expected, update).await
    }
}

#[tokio::test]
async fn losing_the_race_reports_already_used() {
    let inner = store_with(vec![
        Ticket::new(id("RACE"), TicketStatus::CheckedIn, "Ana").with_check_in(at(19, 0, 0)),
    ])
    .await;
    let store = StaleReads {
        inner: inner.clone(),
        stale: Ticket::new(id("RACE"), TicketStatus::Valid, "Ana"),
        served: AtomicBool::new(false),
    };

    let outcome = ValidationEngine::new(Arc::new(store)).validate("RACE", None).await;

    assert_eq!(outcome.kind, OutcomeKind::AlreadyUsed);
    assert_eq!(outcome.detail, "Checked in at 19:00:00");
    assert_eq!(
        inner.snapshot(&id("RACE")).await.unwrap().check_in_timestamp,
        Some(at(19, 0, 0))
    );
}

#[tokio::test]
async fn ticket_removed_mid_validation_is_not_found() {
    let store = StaleReads {
        inner: store(),
        stale: Ticket::new(id("GONE"), TicketStatus::Valid, "Ana"),
        served: AtomicBool::new(false),
    };

    let outcome = ValidationEngine::new(Arc::new(store)).validate("GONE", None).await;

    assert_eq!(outcome.kind, OutcomeKind::NotFound);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn store_outage_is_a_system_error() {
    let store = store_with(vec![Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana")]).await;
    store.set_outage(true);
    let engine = engine(&store);

    let outcome = engine.validate("ABC123", None).await;
    assert_eq!(outcome.kind, OutcomeKind::SystemError);
    assert_eq!(outcome.headline, "System Error");
    assert_eq!(outcome.detail, "Check your connection.");
    assert!(outcome.kind.is_retriable());

    // Retrying after the outage admits the ticket
    store.set_outage(false);
    assert_eq!(engine.validate("ABC123", None).await.kind, OutcomeKind::Admitted);
}

/// Store that answers after a fixed delay.
struct SlowStore {
    inner: InMemoryTicketStore,
    delay: Duration,
}

#[async_trait]
impl TicketStore for SlowStore {
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        self.inner.conditional_update(id, expected, update).await
    }
}

#[tokio::test]
async fn slow_store_times_out_as_system_error() {
    let inner = store_with(vec![Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana")]).await;
    let store = SlowStore {
        inner: inner.clone(),
        delay: Duration::from_millis(500),
    };

    let outcome = ValidationEngine::new(Arc::new(store))
        .with_timeout(Duration::from_millis(20))
        .validate("ABC123", None)
        .await;

    assert_eq!(outcome.kind, OutcomeKind::SystemError);
    assert_eq!(inner.snapshot(&id("ABC123")).await.unwrap().status, TicketStatus::Valid);
}

#[tokio::test]
async fn engine_stamps_check_in_with_store_clock() {
    let when = at(21, 45, 0);
    let store = InMemoryTicketStore::new(Arc::new(FixedClock::new(when)));
    store.insert(Ticket::new(id("ABC123"), TicketStatus::Valid, "Ana")).await;

    engine(&store).validate("ABC123", None).await;

    let stored = store.snapshot(&id("ABC123")).await.unwrap();
    assert_eq!(stored.check_in_timestamp, Some(when));
    assert!(stored.is_consistent());
}
