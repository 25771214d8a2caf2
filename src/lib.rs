pub mod activity;
pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod media;
pub mod metrics;
pub mod notifications;
pub mod pets;
pub mod pipeline;
pub mod retry;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod vaccine;
pub mod validation;

#[cfg(test)]
mod testing;
