pub mod actuator;
pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod routes;
