pub mod booking_service;
pub mod envelope_status;
pub mod signing_provider;
