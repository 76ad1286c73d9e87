pub mod bookings;
pub mod contracts;
pub mod enums;
pub mod reconciliation;
