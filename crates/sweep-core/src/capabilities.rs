//! Device capability traits used by the bundled step routines.
//!
//! The engine itself never talks to hardware. These traits are the seam the
//! grid routine and video mode drive; drivers implement them with interior
//! mutability, exactly one capability per concern.

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Motion / set point control
///
/// Anything a sweep can set: stages, voltage sources, magnet supplies.
///
/// # Contract
/// - Values are in device-native units
/// - `move_abs` initiates the change and may return before it completes
/// - `wait_settled` returns once the device has reached its target
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to absolute position
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Get current position
    ///
    /// May be approximate while the device is moving.
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to settle
    ///
    /// Should have an internal timeout to prevent infinite blocking.
    async fn wait_settled(&self) -> Result<()>;
}

/// Capability: Scalar Readout
///
/// Devices that produce one scalar per read (multimeters, lock-ins, power
/// meters).
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    async fn read(&self) -> Result<f64>;
}
