// Built-in jobs shipped with the worker

pub mod heartbeat;

pub use heartbeat::HeartbeatJob;
