//! Media ingestion core
//!
//! Detects file types from content, inspects media files, and drives uploaded
//! assets through the `pending -> processing -> active | failed` state machine
//! while keeping each upload's aggregate status up to date.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod media_file;
pub mod models;
pub mod policy;
pub mod processor;
pub mod resolver;
pub mod scaler;
pub mod sniffer;
pub mod storage;
pub mod store;
pub mod upload;
