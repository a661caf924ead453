// Infrastructure layer: concrete data sources and report sinks.

pub mod mock;
pub mod sink;
