//! Classroom attention monitoring: perception event ingestion, rolling
//! threshold alerts, live engagement scores and periodic reports.

pub mod alerts;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod report;
pub mod session;
pub mod store;
pub mod threshold;

#[cfg(test)]
mod testutil;

pub use config::MonitorConfig;
pub use db::PgStore;
pub use engine::{Clock, ManualClock, Monitor, SystemClock};
pub use error::{MonitorError, Result};
pub use memory::MemoryStore;
pub use store::MonitorStore;
