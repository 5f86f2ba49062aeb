pub mod aggregator;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod market;
pub mod models;
pub mod monitor;
pub mod risk;
pub mod scorer;

pub use models::*;
