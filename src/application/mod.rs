// Application layer: fetch scheduling, analysis and signal construction.

pub mod aggregator;
pub mod indicators;
pub mod options;
pub mod orchestrator;
pub mod quota;
pub mod scheduler;
