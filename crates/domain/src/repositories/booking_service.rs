use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

use crate::value_objects::bookings::{ActionAckModel, BookingDetailModel};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BookingServiceError {
    #[error("booking {0} not found")]
    NotFound(i64),
    /// The service refused the request because of the booking's current state (409/422).
    #[error("booking service rejected the request: {0}")]
    Rejected(String),
    #[error("booking service unreachable: {0}")]
    Transport(String),
    #[error("unexpected booking service response: {0}")]
    Decode(String),
}

pub type BookingServiceResult<T> = std::result::Result<T, BookingServiceError>;

#[async_trait]
#[automock]
pub trait BookingService {
    async fn get_booking(&self, booking_id: i64) -> BookingServiceResult<BookingDetailModel>;

    async fn accept(&self, booking_id: i64) -> BookingServiceResult<ActionAckModel>;

    async fn reject(
        &self,
        booking_id: i64,
        reason: Option<String>,
    ) -> BookingServiceResult<ActionAckModel>;
}
