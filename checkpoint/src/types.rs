//! Domain types for the check-in validator.
//!
//! The ticket record is owned by an external store; this module only describes its shape
//! and the one mutation the validator is allowed to request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Longest identifier accepted from a scanned code.
pub const MAX_TICKET_ID_LEN: usize = 256;

/// Identifier of a ticket, equal to the string encoded in its QR code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Normalise raw scanner or request input into a `TicketId`.
    ///
    /// Surrounding whitespace is trimmed. Returns `None` when nothing is left, when the
    /// value is longer than [`MAX_TICKET_ID_LEN`], or when it contains control characters
    /// or a `/` (which cannot be a document key).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_TICKET_ID_LEN {
            return None;
        }
        if trimmed.chars().any(|c| c.is_control() || c == '/') {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Status of a ticket record.
///
/// Canonical forms are written; the legacy forms (`VALIDO`, `CHECK_IN_REALIZADO`,
/// `CANCELADO`, `EXCLUIDO`) are read as aliases. Any other string is kept verbatim in
/// [`TicketStatus::Unrecognized`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TicketStatus {
    /// Sold and not yet used
    Valid,
    /// Already admitted at the door
    CheckedIn,
    /// Cancelled by the organizer or the buyer
    Cancelled,
    /// Removed by the organizer
    Deleted,
    /// Any status this validator does not know about
    Unrecognized(String),
}

impl TicketStatus {
    /// Parse a stored status string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "VALID" | "VALIDO" => Self::Valid,
            "CHECKED_IN" | "CHECK_IN_REALIZADO" => Self::CheckedIn,
            "CANCELLED" | "CANCELADO" => Self::Cancelled,
            "DELETED" | "EXCLUIDO" => Self::Deleted,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Canonical string written to stores.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Valid => "VALID",
            Self::CheckedIn => "CHECKED_IN",
            Self::Cancelled => "CANCELLED",
            Self::Deleted => "DELETED",
            Self::Unrecognized(other) => other,
        }
    }

    /// Every stored string that reads back as this status.
    ///
    /// Used by backends that compare raw column values.
    #[must_use]
    pub fn stored_forms(&self) -> Vec<String> {
        let legacy = match self {
            Self::Valid => Some("VALIDO"),
            Self::CheckedIn => Some("CHECK_IN_REALIZADO"),
            Self::Cancelled => Some("CANCELADO"),
            Self::Deleted => Some("EXCLUIDO"),
            Self::Unrecognized(_) => None,
        };
        std::iter::once(self.as_str())
            .chain(legacy)
            .map(str::to_string)
            .collect()
    }
}

impl From<String> for TicketStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<TicketStatus> for String {
    fn from(status: TicketStatus) -> Self {
        match status {
            TicketStatus::Unrecognized(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Ticket record
// ============================================================================

/// A ticket record as held by the ticket store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Primary key, equal to the QR payload
    pub ticket_id: TicketId,
    /// Current status
    pub status: TicketStatus,
    /// Buyer display name
    #[serde(default)]
    pub buyer_name: String,
    /// Set exactly once, when the ticket is checked in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_timestamp: Option<DateTime<Utc>>,
    /// Operator who checked the ticket in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_by: Option<String>,
    /// Soft-delete flag set by the organizer console
    #[serde(default)]
    pub is_deleted: bool,
}

impl Ticket {
    /// Create a ticket that has not been checked in.
    #[must_use]
    pub fn new(ticket_id: TicketId, status: TicketStatus, buyer_name: impl Into<String>) -> Self {
        Self {
            ticket_id,
            status,
            buyer_name: buyer_name.into(),
            check_in_timestamp: None,
            scanned_by: None,
            is_deleted: false,
        }
    }

    /// Set the check-in timestamp (builder style).
    #[must_use]
    pub fn with_check_in(mut self, at: DateTime<Utc>) -> Self {
        self.check_in_timestamp = Some(at);
        self
    }

    /// Set the soft-delete flag (builder style).
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Whether the organizer removed this ticket, by flag or by status.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.is_deleted || self.status == TicketStatus::Deleted
    }

    /// A check-in timestamp is present exactly when the status is `CHECKED_IN`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        matches!(self.status, TicketStatus::CheckedIn) == self.check_in_timestamp.is_some()
    }

    /// Whether a conditional update expecting `expected` may apply to this record.
    ///
    /// Removed tickets never match.
    #[must_use]
    pub fn matches_expected(&self, expected: &TicketStatus) -> bool {
        !self.is_removed() && &self.status == expected
    }

    /// Apply `update`, stamping `now` as the store's time.
    pub fn apply(&mut self, update: &TicketUpdate, now: DateTime<Utc>) {
        match update {
            TicketUpdate::CheckIn { scanned_by } => {
                self.status = TicketStatus::CheckedIn;
                self.check_in_timestamp = Some(now);
                self.scanned_by.clone_from(scanned_by);
            },
        }
    }
}

/// Field changes the validator can request through a conditional update.
///
/// Timestamps are never supplied by the caller; the store stamps its own time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketUpdate {
    /// `VALID → CHECKED_IN`
    CheckIn {
        /// Operator performing the check-in
        #[serde(default, rename = "scannedBy", skip_serializing_if = "Option::is_none")]
        scanned_by: Option<String>,
    },
}

impl TicketUpdate {
    /// Check-in performed by `operator`.
    #[must_use]
    pub fn check_in(operator: Option<&str>) -> Self {
        Self::CheckIn {
            scanned_by: operator.map(str::to_string),
        }
    }
}
