//! Scheiber device model: wire protocol, outputs, transitions, and the
//! Bloc9 device itself.

pub mod bloc9;
pub mod light;
pub mod output;
pub mod protocol;
pub mod transitions;

#[cfg(test)]
pub(crate) mod testutil;

pub use bloc9::{Bloc9, DeviceEvent, Output, RouteOutcome};
pub use light::{DimmableLight, SetRequest};
pub use output::{ObserverList, OutputCore, Snapshot, Switch};
