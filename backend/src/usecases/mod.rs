pub mod contract_views;
