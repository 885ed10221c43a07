/// Shared store abstraction and its backends.
pub mod game_store;
/// Record definitions shared by every store backend.
pub mod models;
/// Storage error type common to all backends.
pub mod storage;
