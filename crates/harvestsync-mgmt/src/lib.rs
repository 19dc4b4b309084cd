#![warn(missing_docs)]

//! harvestsync management: sync CLI, configuration, ResourceSync delivery server

pub mod api;
pub mod cli;
pub mod config;

pub use api::DeliveryApi;
pub use config::MgmtConfig;
