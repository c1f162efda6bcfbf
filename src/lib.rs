//! xSushi Tracker Library
//!
//! Hourly xSushi/Sushi ratio sampling with change alerts and a charting API

pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod sampler;
pub mod scheduler;
pub mod source;
pub mod types;
