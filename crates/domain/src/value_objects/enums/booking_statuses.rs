use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    DepositPaid,
    FullyPaid,
    InProgress,
    Completed,
    Canceled,
    CancelRequested,
}

/// Display and permission metadata for a single status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusMetadata {
    pub label: &'static str,
    pub permits_approve_reject: bool,
    pub permits_contract_view: bool,
}

/// Things that move a booking from one status to the next.
///
/// `Approve`/`Reject` come from the owner, the rest are reported by the
/// payment flow or by the trip clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    Approve,
    Reject,
    DepositPaid,
    FullyPaid,
    TripStarted,
    TripEnded,
    CancelRequested,
    CancelApproved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("booking cannot go from {from} on {event:?}")]
pub struct TransitionError {
    pub from: BookingStatus,
    pub event: BookingEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown booking status: {0}")]
pub struct UnknownBookingStatus(pub String);

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::DepositPaid,
        BookingStatus::FullyPaid,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Canceled,
        BookingStatus::CancelRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::DepositPaid => "deposit_paid",
            BookingStatus::FullyPaid => "fully_paid",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::CancelRequested => "cancel_requested",
        }
    }

    pub fn metadata(&self) -> StatusMetadata {
        let (label, permits_approve_reject, permits_contract_view) = match self {
            BookingStatus::Pending => ("Awaiting approval", true, false),
            BookingStatus::Confirmed => ("Confirmed", false, false),
            BookingStatus::DepositPaid => ("Deposit paid", false, true),
            BookingStatus::FullyPaid => ("Fully paid", false, true),
            BookingStatus::InProgress => ("In progress", false, true),
            BookingStatus::Completed => ("Completed", false, true),
            BookingStatus::Canceled => ("Canceled", false, false),
            BookingStatus::CancelRequested => ("Cancellation requested", false, true),
        };

        StatusMetadata {
            label,
            permits_approve_reject,
            permits_contract_view,
        }
    }

    pub fn label(&self) -> &'static str {
        self.metadata().label
    }

    pub fn permits_approve_reject(&self) -> bool {
        self.metadata().permits_approve_reject
    }

    pub fn permits_contract_view(&self) -> bool {
        self.metadata().permits_contract_view
    }

    /// Signing is only offered while the contract is viewable and the booking is still live.
    pub fn permits_signing(&self) -> bool {
        self.permits_contract_view() && !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Canceled)
    }

    pub fn apply(self, event: BookingEvent) -> Result<BookingStatus, TransitionError> {
        use BookingEvent as E;
        use BookingStatus as S;

        let next = match (self, event) {
            (S::Pending, E::Approve) => S::Confirmed,
            (S::Pending, E::Reject) => S::Canceled,
            (S::Confirmed, E::DepositPaid) => S::DepositPaid,
            (S::DepositPaid, E::FullyPaid) => S::FullyPaid,
            (S::FullyPaid, E::TripStarted) => S::InProgress,
            (S::InProgress, E::TripEnded) => S::Completed,
            (S::Confirmed | S::DepositPaid | S::FullyPaid, E::CancelRequested) => {
                S::CancelRequested
            }
            (S::CancelRequested, E::CancelApproved) => S::Canceled,
            (from, event) => return Err(TransitionError { from, event }),
        };

        Ok(next)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        const EVENTS: [BookingEvent; 8] = [
            BookingEvent::Approve,
            BookingEvent::Reject,
            BookingEvent::DepositPaid,
            BookingEvent::FullyPaid,
            BookingEvent::TripStarted,
            BookingEvent::TripEnded,
            BookingEvent::CancelRequested,
            BookingEvent::CancelApproved,
        ];

        EVENTS
            .iter()
            .any(|event| self.apply(*event) == Ok(next))
    }
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownBookingStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value.trim())
            .ok_or_else(|| UnknownBookingStatus(value.to_string()))
    }
}
