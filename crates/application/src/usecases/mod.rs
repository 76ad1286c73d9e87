pub mod booking_actions;
pub mod contract_envelopes;
pub mod contract_view;
pub mod document_assembler;
pub mod signing_session;
pub mod status_reconciler;
