//! Stages shipped with the crate.
//!
//! - [`Execute`]: subprocess output, as raw chunks or (for `candump`) lines
//! - [`FileReader`]: recorded files, optionally replayed forever
//! - [`Throttle`]: byte-rate pacing for file replay
//! - [`Liner`]: splits chunks into lines
//! - [`TcpClient`] / [`UdpListener`]: network sources
//! - [`Recorder`]: multiplexed raw log writer
//! - [`FromJson`]: Signal K delta JSON decoder

mod execute;
mod file;
mod from_json;
mod liner;
mod recorder;
mod tcp;
mod throttle;
mod udp;

pub use execute::{Execute, Framing};
pub use file::FileReader;
pub use from_json::FromJson;
pub use liner::Liner;
pub use recorder::{log_file_name, Recorder};
pub use tcp::TcpClient;
pub use throttle::Throttle;
pub use udp::UdpListener;

use crate::stage::{StageKind, StageRegistry};

/// Size of the read buffer used by byte sources.
pub(crate) const READ_CHUNK: usize = 16 * 1024;

pub(crate) fn register_builtins(registry: &mut StageRegistry) {
    registry.register(StageKind::Execute, execute::create_execute);
    registry.register(StageKind::CanDump, execute::create_candump);
    registry.register(StageKind::FileReader, file::create);
    registry.register(StageKind::Throttle, throttle::create);
    registry.register(StageKind::Liner, liner::create);
    registry.register(StageKind::TcpClient, tcp::create);
    registry.register(StageKind::UdpListener, udp::create);
    registry.register(StageKind::Recorder, recorder::create);
    registry.register(StageKind::FromJson, from_json::create);
}
