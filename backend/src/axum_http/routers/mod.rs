pub mod bookings;
pub mod contracts;
