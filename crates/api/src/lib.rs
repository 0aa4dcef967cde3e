//! HTTP API: job submission, status polling and store lookups.

pub mod app;
