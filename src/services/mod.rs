/// Passive participant strategy.
pub mod follower;
/// Hint ledger and suggestion lookup.
pub mod hint;
/// Authoritative host strategy.
pub mod host;
/// Deterministic letter selection.
pub mod letter;
/// Bounded cancellable retry.
pub mod retry;
/// Answer submission and completeness checks.
pub mod submission;
/// Strategy seam and reconciliation driver.
pub mod sync;
