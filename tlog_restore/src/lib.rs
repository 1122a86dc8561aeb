//! Continuous restore driver and the CLI glue that drives it in a loop
//! against a long-lived target process.

pub mod driver;
pub mod error;

pub mod prelude {
    pub use crate::driver::{run_continuous, DriverConfig, ShutdownReason};
    pub use crate::error::{RestoreError, RestoreResult};
}
