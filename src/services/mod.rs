/// Live per-participant session client and mutation commit.
pub mod client;
/// OpenAPI documentation generation.
pub mod documentation;
/// Estimation scale aggregation.
pub mod estimation;
/// Health check service.
pub mod health_service;
/// Pure planning of session mutations into partial writes.
pub mod mutations;
/// Age and count limits applied before session creation.
pub mod retention;
/// Session lifecycle flows used by the HTTP routes.
pub mod session_service;
/// Server-Sent Events bridging of session clients.
pub mod sse_service;
/// Storage connection supervisor with backoff and degraded mode.
pub mod storage_supervisor;
