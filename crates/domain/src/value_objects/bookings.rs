use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::entities::bookings::{ActionAckEntity, BookingEntity, RenterEntity, VehicleEntity};
use crate::value_objects::contracts::ContractEnvelope;
use crate::value_objects::enums::booking_statuses::{BookingStatus, UnknownBookingStatus};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenterModel {
    pub id: i64,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VehicleSummaryModel {
    pub id: i64,
    pub name: Option<String>,
    pub license_plate: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingDetailModel {
    pub id: i64,
    pub status: BookingStatus,
    pub renter: RenterModel,
    pub vehicle: Option<VehicleSummaryModel>,
    pub created_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub start_time: Option<String>,
    pub end_date: NaiveDate,
    pub end_time: Option<String>,
    pub envelope: ContractEnvelope,
}

/// Booking detail plus what the owner may do with it, read off the status table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: BookingDetailModel,
    pub status_label: &'static str,
    pub can_approve_reject: bool,
    pub can_view_contract: bool,
}

impl From<BookingDetailModel> for BookingView {
    fn from(booking: BookingDetailModel) -> Self {
        let metadata = booking.status.metadata();
        Self {
            status_label: metadata.label,
            can_approve_reject: metadata.permits_approve_reject,
            can_view_contract: metadata.permits_contract_view,
            booking,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionAckModel {
    pub success: bool,
    pub message: Option<String>,
}

impl From<RenterEntity> for RenterModel {
    fn from(value: RenterEntity) -> Self {
        let display_name = value
            .full_name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| value.email.clone())
            .unwrap_or_else(|| format!("Renter #{}", value.id));

        Self {
            id: value.id,
            display_name,
            email: value.email,
            phone: value.phone,
        }
    }
}

impl From<VehicleEntity> for VehicleSummaryModel {
    fn from(value: VehicleEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            license_plate: value.license_plate,
            thumbnail_url: value.thumbnail_url,
        }
    }
}

impl TryFrom<BookingEntity> for BookingDetailModel {
    type Error = UnknownBookingStatus;

    fn try_from(value: BookingEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            status: value.status.parse()?,
            renter: value.renter.into(),
            vehicle: value.vehicle.map(VehicleSummaryModel::from),
            created_at: value.created_at,
            start_date: value.start_date,
            start_time: value.start_time,
            end_date: value.end_date,
            end_time: value.end_time,
            envelope: value.contract.into(),
        })
    }
}

impl From<ActionAckEntity> for ActionAckModel {
    fn from(value: ActionAckEntity) -> Self {
        Self {
            success: value.success,
            message: value.message.filter(|message| !message.trim().is_empty()),
        }
    }
}
