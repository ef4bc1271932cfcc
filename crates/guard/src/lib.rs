//! Restart guard process surface: configuration, signals and the HTTP API

pub mod api;
pub mod config;
pub mod signals;
