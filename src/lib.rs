//! Activity engine: synthetic usage traffic for a job-based image service.

pub mod actions;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod service;
