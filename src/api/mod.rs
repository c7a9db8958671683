// =============================================================================
// API Module — HTTP surface of the engine
// =============================================================================

pub mod rest;

pub use rest::router;
