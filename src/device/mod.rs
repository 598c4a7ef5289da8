pub mod adb;
pub mod executor;
pub mod types;

pub use adb::{AdbDevice, DeviceControl};
pub use executor::ActionExecutor;
pub use types::{ActionError, ActionResult, DeviceError, DeviceResult, RawWaypoint, Waypoint, normalize};
