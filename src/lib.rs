//! EDGEGATE: prediction-market edge scoring with human-approved execution.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod platforms;
pub mod storage;
pub mod strategy;
pub mod types;
