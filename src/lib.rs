//! FordPass Battery Monitor Library
//!
//! Core modules for the EV battery change monitor: two-stage token
//! exchange, telemetry fetch and projection, and the change-detection
//! polling loop.

pub mod auth;
pub mod cli;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod storage;
pub mod telemetry;
