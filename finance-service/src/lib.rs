//! Finance Service - the financial ledger and invoice lifecycle engine.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
