pub mod agent;
pub mod api;
pub mod config;
pub mod errors;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod store;
pub mod ws;
