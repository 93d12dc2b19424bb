//! Agronomic insight engine.
//!
//! - `assistant`: snapshot assembly, confidence and the chat entry point
//! - `insights`: anomaly detectors, the ranked insight feed and plot urgency
//! - `weather`: forecast client, organization sync and its freshness gate
//! - `db`: the SQLite farm store these read from

pub mod assistant;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod insights;
mod migrations;
pub mod weather;

pub use db::{FarmDb, SharedDb};
pub use error::{AssistantError, AssistantErrorPayload};
