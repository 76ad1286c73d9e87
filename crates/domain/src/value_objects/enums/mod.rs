pub mod booking_statuses;
pub mod signer_roles;
