//! Position and orientation acquisition
//!
//! - [`source`]: the `PositionSource` / `PositionStream` traits
//! - [`sensors`]: orientation sensor registration with RAII unregistration
//! - [`simulated`], [`stdin_source`], [`replay`]: concrete feeds

pub mod replay;
pub mod sensors;
pub mod simulated;
pub mod source;
pub mod stdin_source;

pub use replay::{ReplayEnd, ReplaySource, ReplayStep};
pub use sensors::{OrientationSensors, SensorError, SensorRegistration};
pub use simulated::{SimulatedSensors, SimulatedSource, SimulationParams};
pub use source::{AcquisitionError, PositionEvent, PositionSource, PositionStream, SamplingRequest};
pub use stdin_source::{LineSource, StdinSource};
