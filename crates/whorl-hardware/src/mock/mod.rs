//! Mock hardware implementations for testing and development.
//!
//! Each mock is created as a `(device, handle)` pair: the device side
//! implements the hardware trait and is handed to the coordinator, while
//! the handle stays with the test (or demo) to script behavior and
//! inspect what the coordinator did.

mod matcher;
mod sensor;

pub use matcher::{MatcherCall, MockMatcher, MockMatcherHandle};
pub use sensor::{MockSensor, MockSensorHandle};
