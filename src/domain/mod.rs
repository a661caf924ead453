// Core data model
pub mod types;

// Domain-specific error types
pub mod errors;

// Port interfaces
pub mod ports;
