// Common library for the job orchestration pipeline shared by scheduler and worker

pub mod capability;
pub mod clock;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod worker;
