// Queue module: dispatch message transport
//
// NATS JetStream in production, an in-process queue for tests and local runs.

pub mod consumer;
pub mod memory;
pub mod nats;
pub mod publisher;

pub use consumer::{Acknowledger, Delivery, MessageReceiver, NatsMessageReceiver};
pub use memory::InMemoryQueue;
pub use nats::{NatsClient, NatsConfig};
pub use publisher::{MessagePublisher, NatsMessagePublisher};
