pub mod config;
pub mod error;
pub mod grid;
pub mod logging;
pub mod orchestrator;
pub mod payload;
pub mod platform;
pub mod quota;
pub mod sampler;
pub mod scenario;
pub mod templates;
pub mod timeshift;
