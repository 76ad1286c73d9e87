use std::sync::Arc;

use domain::{
    repositories::booking_service::{BookingService, BookingServiceError},
    value_objects::{
        bookings::{ActionAckModel, BookingDetailModel, BookingView},
        enums::booking_statuses::{BookingEvent, BookingStatus},
    },
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookingActionError {
    #[error("booking {booking_id} cannot be {action}: {message}")]
    InvalidTransition {
        booking_id: i64,
        action: &'static str,
        message: String,
    },
    #[error("an empty rejection reason must be confirmed explicitly")]
    ReasonConfirmationRequired,
    #[error("booking {0} not found")]
    NotFound(i64),
    #[error("booking service unavailable: {0}")]
    TransportFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    Text(String),
    /// The owner explicitly confirmed rejecting without a reason.
    ConfirmedEmpty,
}

impl RejectionReason {
    pub fn from_input(
        text: Option<&str>,
        confirm_empty: bool,
    ) -> Result<Self, BookingActionError> {
        match text.map(str::trim).filter(|text| !text.is_empty()) {
            Some(text) => Ok(RejectionReason::Text(text.to_string())),
            None if confirm_empty => Ok(RejectionReason::ConfirmedEmpty),
            None => Err(BookingActionError::ReasonConfirmationRequired),
        }
    }

    fn into_wire(self) -> Option<String> {
        match self {
            RejectionReason::Text(text) => Some(text),
            RejectionReason::ConfirmedEmpty => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionOutcome {
    pub booking_id: i64,
    pub message: Option<String>,
    /// Fresh booking detail; `None` when the follow-up read failed.
    pub booking: Option<BookingView>,
}

/// Owner decisions on a pending booking. The booking service is the judge of
/// whether the booking is still pending; nothing is decided from cached state.
pub struct BookingActionGateway<B>
where
    B: BookingService + Send + Sync + 'static,
{
    booking_service: Arc<B>,
    refresh_tx: watch::Sender<u64>,
}

impl<B> BookingActionGateway<B>
where
    B: BookingService + Send + Sync + 'static,
{
    pub fn new(booking_service: Arc<B>) -> Self {
        let (refresh_tx, _) = watch::channel(0);
        Self {
            booking_service,
            refresh_tx,
        }
    }

    /// Generation counter bumped after every successful action, for booking-list observers.
    pub fn subscribe_refresh(&self) -> watch::Receiver<u64> {
        self.refresh_tx.subscribe()
    }

    pub async fn booking(&self, booking_id: i64) -> Result<BookingView, BookingActionError> {
        let booking = self
            .booking_service
            .get_booking(booking_id)
            .await
            .map_err(|err| map_service_error(booking_id, "read", err))?;

        Ok(BookingView::from(booking))
    }

    pub async fn approve(&self, booking_id: i64) -> Result<ActionOutcome, BookingActionError> {
        info!(booking_id, "booking_actions: approve requested");

        let ack = self
            .booking_service
            .accept(booking_id)
            .await
            .map_err(|err| map_service_error(booking_id, "approved", err))?;

        self.finish(booking_id, BookingEvent::Approve, "approved", ack)
            .await
    }

    pub async fn reject(
        &self,
        booking_id: i64,
        reason: RejectionReason,
    ) -> Result<ActionOutcome, BookingActionError> {
        info!(
            booking_id,
            with_reason = matches!(reason, RejectionReason::Text(_)),
            "booking_actions: reject requested"
        );

        let ack = self
            .booking_service
            .reject(booking_id, reason.into_wire())
            .await
            .map_err(|err| map_service_error(booking_id, "rejected", err))?;

        self.finish(booking_id, BookingEvent::Reject, "rejected", ack)
            .await
    }

    async fn finish(
        &self,
        booking_id: i64,
        event: BookingEvent,
        action: &'static str,
        ack: ActionAckModel,
    ) -> Result<ActionOutcome, BookingActionError> {
        if !ack.success {
            let message = ack
                .message
                .unwrap_or_else(|| "booking is no longer pending".to_string());
            warn!(
                booking_id,
                action,
                message,
                "booking_actions: booking service refused the transition"
            );
            return Err(BookingActionError::InvalidTransition {
                booking_id,
                action,
                message,
            });
        }

        self.refresh_tx.send_modify(|generation| *generation += 1);

        let booking = match self.booking_service.get_booking(booking_id).await {
            Ok(booking) => {
                let expected = BookingStatus::Pending.apply(event).ok();
                if Some(booking.status) != expected
                    && !BookingStatus::Pending.can_transition_to(booking.status)
                {
                    warn!(
                        booking_id,
                        action,
                        status = %booking.status,
                        "booking_actions: refreshed status is not a successor of pending"
                    );
                }
                Some(BookingView::from(booking))
            }
            Err(err) => {
                warn!(
                    booking_id,
                    action,
                    error = %err,
                    "booking_actions: action applied but refresh failed"
                );
                None
            }
        };

        info!(booking_id, action, "booking_actions: action applied");

        Ok(ActionOutcome {
            booking_id,
            message: ack.message,
            booking,
        })
    }
}

fn map_service_error(
    booking_id: i64,
    action: &'static str,
    err: BookingServiceError,
) -> BookingActionError {
    match err {
        BookingServiceError::Rejected(message) => {
            warn!(
                booking_id,
                action,
                message,
                "booking_actions: booking service refused the transition"
            );
            BookingActionError::InvalidTransition {
                booking_id,
                action,
                message,
            }
        }
        BookingServiceError::NotFound(id) => BookingActionError::NotFound(id),
        BookingServiceError::Transport(reason) | BookingServiceError::Decode(reason) => {
            error!(
                booking_id,
                action,
                reason,
                "booking_actions: booking service call failed"
            );
            BookingActionError::TransportFailure(reason)
        }
    }
}
