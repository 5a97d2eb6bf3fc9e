pub mod connection;
pub mod consumer;
pub mod error;
pub mod publisher;
pub mod topology;

pub use connection::connect;
pub use consumer::queue_consumer;
pub use error::MqError;
pub use publisher::Publisher;
pub use topology::declare_topology;
