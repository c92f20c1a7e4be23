//! Warm-up engine — gradual, reputation-safe ramp-up of sending mailboxes.

pub mod activity;
pub mod api;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod ramp;
pub mod scheduler;
pub mod store;
pub mod transport;
