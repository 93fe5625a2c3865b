pub mod types;
pub mod config;
pub mod error;
pub mod deadline;
pub mod stats;
