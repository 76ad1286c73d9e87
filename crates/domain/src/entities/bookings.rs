use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Booking detail as returned by `GET bookings/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingEntity {
    pub id: i64,
    pub status: String,
    pub renter: RenterEntity,
    pub vehicle: Option<VehicleEntity>,
    pub created_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_date: NaiveDate,
    pub end_time: Option<String>,
    pub contract: Option<ContractEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenterEntity {
    pub id: i64,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleEntity {
    pub id: i64,
    pub name: Option<String>,
    pub license_plate: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Embedded contract sub-object. Depending on the backend version the
/// signatures come back as timestamps, booleans, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContractEntity {
    pub contract_number: Option<String>,
    pub owner_signed_at: Option<DateTime<Utc>>,
    pub renter_signed_at: Option<DateTime<Utc>>,
    pub owner_signed: Option<bool>,
    pub renter_signed: Option<bool>,
}

/// Body of `PATCH bookings/{id}/accept` and `PATCH bookings/{id}/reject`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionAckEntity {
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectBookingEntity {
    pub reason: Option<String>,
}
