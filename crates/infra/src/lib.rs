//! Infrastructure layer: rendezvous stores, correlation bridge, job
//! registry, generation pipeline, Redis adapters, config.

pub mod config;
pub mod correlation;
pub mod event_bus;
pub mod jobs;
pub mod orchestrator;
pub mod rendezvous;
pub mod workers;
