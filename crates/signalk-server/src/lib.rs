//! # signalk-server
//!
//! Runtime side of the gateway, on tokio.
//!
//! - [`EventBus`]: fans provider deltas out to per-path value streams
//! - [`to_nmea`]: runs the NMEA 0183 encoders against the bus
//! - [`NmeaTcpServer`]: serves the outbound sentences over TCP

pub mod bus;
pub mod error;
pub mod nmea_tcp;
pub mod to_nmea;

pub use bus::{EventBus, PathStream};
pub use error::ServerError;
pub use nmea_tcp::NmeaTcpServer;
pub use signalk_core::Delta;
pub use to_nmea::{outbound_channel, run_encoder, spawn_encoders};
