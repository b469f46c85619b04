// DéclaTogo client - Library root

pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http_client;
pub mod session;
