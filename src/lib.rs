//! Spacecraft telemetry console: reconciles push and poll feeds into one
//! consistent dashboard state.
pub mod clients;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod render;
pub mod repo;
pub mod routes;
pub mod services;
pub mod utils;
