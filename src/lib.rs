//! Library crate for planning-poker-back, exposing modules for binaries and integration tests.

/// Configuration file and environment loading.
pub mod config;
/// Storage layer: documents, patches and store backends.
pub mod dao;
/// HTTP payloads and viewer projections.
pub mod dto;
/// Error types from storage up to HTTP responses.
pub mod error;
/// Axum routers.
pub mod routes;
/// Session workflows, live clients and background tasks.
pub mod services;
/// Shared application state and the session domain model.
pub mod state;
