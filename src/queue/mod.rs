pub mod broker;
pub mod store;

pub use broker::{Broker, BrokerError, Channel, Consumer, Delivery};
pub use store::{DeadLetter, FjallQueue, QueueError};
