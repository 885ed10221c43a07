//! Wire payloads exchanged with the external judge and hint services.

/// Hint service payloads.
pub mod hint;
/// Judge service payloads.
pub mod judge;
