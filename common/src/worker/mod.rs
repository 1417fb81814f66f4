// Worker module: queue listeners that resolve and run jobs

pub mod listener;
pub mod pool;

pub use listener::{AckPolicy, MessageOutcome, QueueListener};
pub use pool::ListenerPool;
