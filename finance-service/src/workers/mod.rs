//! Background workers.

pub mod renewals;

pub use renewals::{RenewalStats, RenewalWorker};
