// bridge: Library entry point.
// Exposes modules for integration testing.

pub mod auth;
pub mod backup;
pub mod cache;
pub mod config;
pub mod downlink;
pub mod engine;
pub mod notify;
pub mod performance;
pub mod protocol_engine;
pub mod uplink;
pub mod webconfig;
