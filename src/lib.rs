pub mod config;
pub mod models;
pub mod resilience;
pub mod services;
pub mod state;
pub mod streaming;
