pub mod client;
pub mod processor;
pub mod stats;
pub mod transmission;

pub use client::{ClientConfig, ClientError, HttpClient};
pub use processor::{ProcessorChain, TelemetryProcessor};
pub use stats::{TransmissionSnapshot, TransmissionStats};
pub use transmission::{
    BatchTransmitter, MAX_CONSECUTIVE_REDIRECTS, Transmit, TransportOutcome, classify_response,
};
