// Scheduler module: trigger loading, fire time evaluation and dispatch

pub mod dispatcher;
pub mod engine;
pub mod store;

pub use dispatcher::Dispatcher;
pub use engine::{
    LoadReport, Scheduler, SchedulerConfig, SchedulerEngine, TriggerInfo, TriggerRejection,
};
pub use store::{JsonFileTriggerStore, StaticTriggerStore, TriggerStore};
