//! Library crate for cards-party-back, exposing modules for binaries and integration tests.

/// Lock-guarded access to table entities.
pub mod actor;
/// Runtime configuration.
pub mod config;
/// Storage capabilities and backends.
pub mod dao;
mod dto;
mod error;
/// Lease-based distributed mutex.
pub mod lock;
/// HTTP routes.
pub mod routes;
/// Request orchestration.
pub mod services;
/// Shared application state and the game model.
pub mod state;
