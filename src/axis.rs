//! Axis collaborator contract for the dual-actuator Z stage.
//!
//! Each physical actuator (motor + controller + link) is driven by its own
//! driver. The coordination core in [`crate::stage`] never talks to a link
//! directly; it only uses the [`StageAxis`] contract defined here. The
//! begin/await split on homing and moves exists so the core can dispatch a
//! command to both axes before waiting on either one.

use std::fmt;
use std::time::Duration;

use strum::{Display, EnumString};
use thiserror::Error;

/// Identifies one of the stage's two axes in errors and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    /// First actuator (dispatched to first).
    A,
    /// Second actuator.
    B,
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisId::A => write!(f, "A"),
            AxisId::B => write!(f, "B"),
        }
    }
}

/// How an axis decelerates when commanded to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StopMode {
    /// Immediate deceleration at the controller's maximum capability.
    Abrupt,
    /// Deceleration following the configured acceleration profile.
    Profiled,
}

/// Session configuration shared by both axes of a stage.
///
/// The stage applies one config to both of its axes: there is no per-axis
/// velocity or acceleration override.
#[derive(Debug, Clone)]
pub struct AxisConfig {
    /// Travel limits in mm, `(min, max)`. Immutable for the session.
    pub limits_mm: (f64, f64),
    /// Initial velocity in mm/s. Mutable via `set_velocity_mmps`.
    pub velocity_mmps: f64,
    /// Acceleration in mm/s². Set at construction only.
    pub acceleration_mmpss: f64,
    /// Whether the driver should home the axis as part of `open`. The stage
    /// always opens with this disabled and coordinates homing itself.
    pub home_on_open: bool,
}

impl AxisConfig {
    /// Config with homing-on-open disabled, as the stage requires.
    pub fn new(limits_mm: (f64, f64), velocity_mmps: f64, acceleration_mmpss: f64) -> Self {
        Self {
            limits_mm,
            velocity_mmps,
            acceleration_mmpss,
            home_on_open: false,
        }
    }
}

/// Failures reported by a single axis driver.
#[derive(Error, Debug)]
pub enum AxisError {
    /// The link could not be opened or closed cleanly.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Homing did not complete.
    #[error("homing did not complete: {0}")]
    Homing(String),

    /// A command (move, velocity) was rejected by the controller,
    /// e.g. a target outside the travel limits.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// A wait on a motion or homing operation exceeded its bound.
    /// Waiting forever on a stalled or disconnected controller is not
    /// an option for interactive control.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),
}

/// Result type for single-axis driver operations.
pub type AxisResult<T> = Result<T, AxisError>;

/// Failures surfaced by the coordination core, tagged with the axis that
/// reported them.
///
/// The core never retries and never rolls back: if one axis accepts a
/// command and the other rejects it, the accepting axis's action stands and
/// the next equalize reconciles any resulting mismatch.
#[derive(Error, Debug)]
pub enum StageError {
    /// An axis driver reported a failure.
    #[error("axis {axis}: {source}")]
    Axis {
        /// Which axis failed.
        axis: AxisId,
        /// The driver's failure.
        #[source]
        source: AxisError,
    },
}

impl StageError {
    /// Tag a driver failure with the axis it came from.
    pub fn on(axis: AxisId, source: AxisError) -> Self {
        StageError::Axis { axis, source }
    }

    /// The axis that reported the failure.
    pub fn axis(&self) -> AxisId {
        match self {
            StageError::Axis { axis, .. } => *axis,
        }
    }
}

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Contract required from each underlying axis driver, independent of
/// transport.
///
/// One implementor per controller model; the two axes of a stage may be
/// different models (and therefore different types), as long as both honor
/// this contract:
///
/// - `begin_home`/`await_home` and `begin_move_mm`/`await_move` are split so
///   the caller can dispatch to two axes before waiting on either.
/// - Reissuing `begin_move_mm` while a previous move is outstanding
///   supersedes the outstanding target: the newest command wins. Hold-button
///   jog workflows reissue moves freely and depend on this.
/// - `position_mm` never blocks and returns the last reported value.
/// - Every `await_*` applies a finite timeout and surfaces
///   [`AxisError::Timeout`] rather than blocking indefinitely.
/// - `stop` on an idle axis is a no-op; stopping a moving axis causes an
///   outstanding `await_move` to resolve.
pub trait StageAxis: Sized {
    /// Connection spec for this driver (port name, address, ...).
    type Link;

    /// Open the link and apply the session config.
    fn open(link: Self::Link, config: &AxisConfig) -> AxisResult<Self>;

    /// Whether the axis has completed its homing routine this session.
    fn is_homed(&self) -> bool;

    /// Start the homing routine without waiting for it.
    fn begin_home(&mut self) -> AxisResult<()>;

    /// Wait for a previously started homing routine to finish.
    fn await_home(&mut self) -> AxisResult<()>;

    /// Apply a new velocity in mm/s.
    fn set_velocity_mmps(&mut self, velocity_mmps: f64) -> AxisResult<()>;

    /// Command a move without waiting for it. `target_mm` is interpreted
    /// relative to the current position when `relative` is true.
    fn begin_move_mm(&mut self, target_mm: f64, relative: bool) -> AxisResult<()>;

    /// Wait for the outstanding move, if any, to settle.
    fn await_move(&mut self) -> AxisResult<()>;

    /// Stop any motion in progress. No-op on an idle axis.
    fn stop(&mut self, mode: StopMode) -> AxisResult<()>;

    /// Last reported position in mm. Non-blocking.
    fn position_mm(&self) -> f64;

    /// Release the link. Position reads after close return stale data.
    fn close(&mut self) -> AxisResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stop_mode_parses_lowercase_names() {
        assert_eq!(StopMode::from_str("abrupt").unwrap(), StopMode::Abrupt);
        assert_eq!(StopMode::from_str("profiled").unwrap(), StopMode::Profiled);
        assert!(StopMode::from_str("gentle").is_err());
    }

    #[test]
    fn stage_error_reports_axis() {
        let err = StageError::on(AxisId::B, AxisError::Rejected("out of limits".into()));
        assert_eq!(err.axis(), AxisId::B);
        assert!(err.to_string().contains("axis B"));
    }
}
