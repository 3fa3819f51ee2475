/// Session document model shared by every backend.
pub mod models;
/// Session store trait and its backends.
pub mod session_store;
/// Storage abstraction layer errors.
pub mod storage;
