//! CAN bus layer: frame/matcher types and the SocketCAN wrapper.

pub mod bus;
pub mod frame;

pub use bus::{BusStats, CanBus, CanSink, FrameCallback};
pub use frame::{Frame, Matcher};
