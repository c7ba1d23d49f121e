pub mod config;
pub mod consumer;
pub mod producer;

pub use consumer::ObservationConsumer;
pub use producer::EventProducer;
