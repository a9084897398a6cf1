/// Testing utilities for the poset workspace
///
/// Provides:
/// - Transaction and payload generators
/// - Fixtures (tracing setup)

pub mod generators;
pub mod fixtures;

pub use generators::*;
pub use fixtures::*;
