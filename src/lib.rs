pub mod affinity;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod health;
pub mod rate;
pub mod strategy;
pub mod types;
