pub mod config;
pub mod dashboard;
pub mod error;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod store;
