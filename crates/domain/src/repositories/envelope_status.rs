use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::repositories::{
    booking_service::BookingServiceError, signing_provider::SigningProviderError,
};
use crate::value_objects::contracts::EnvelopeSnapshot;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeStatusError {
    #[error(transparent)]
    Booking(#[from] BookingServiceError),
    #[error(transparent)]
    Provider(#[from] SigningProviderError),
}

/// Produces the authoritative envelope snapshot for a booking in one call.
#[async_trait]
#[automock]
pub trait EnvelopeStatusSource {
    async fn fetch_snapshot(
        &self,
        booking_id: i64,
    ) -> std::result::Result<EnvelopeSnapshot, EnvelopeStatusError>;
}
