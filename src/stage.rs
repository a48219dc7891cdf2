//! Coordination core for a dual-actuator Z stage.
//!
//! Two independently addressable linear actuators are mechanically coupled to
//! the same platform, so they must always report and move to matching
//! positions. [`DualAxisStage`] makes the pair behave as one actuator:
//!
//! - **Homing coordination**: both axes home concurrently at open.
//! - **Drift correction**: [`equalize`](DualAxisStage::equalize) drives the
//!   lagging axis forward to match the leading one.
//! - **Coordinated moves**: the same command is dispatched to both axes
//!   before waiting on either, so the axes move together rather than one
//!   noticeably after the other.
//! - **Coordinated stop**: both axes stop with the same mode.
//!
//! # Lifecycle
//!
//! One stage per session: [`open`](DualAxisStage::open) acquires both links,
//! homes and equalizes; move/stop/velocity calls mutate it; and
//! [`close`](DualAxisStage::close) consumes it, equalizing one last time
//! before releasing both links. Closing twice is impossible by construction.
//!
//! # Partial failure
//!
//! There is no shared transaction mechanism between the two controllers, so
//! the core deliberately does not roll back: when one axis accepts a command
//! and the other rejects it, the accepting axis's action stands and the next
//! equalize (explicit, or the one inside close) reconciles the mismatch.
//! [`stop`](DualAxisStage::stop) and [`equalize`](DualAxisStage::equalize)
//! remain safe to call after any runtime failure.

use tracing::{debug, info};

use crate::axis::{AxisConfig, AxisId, StageAxis, StageError, StageResult, StopMode};

/// Two linear actuators presented as a single logical vertical-motion axis.
///
/// Generic over the two driver types since the two controllers need not be
/// the same model.
///
/// # Example
///
/// ```
/// use zstage::{DualAxisStage, SimAxis, SimLink, StopMode};
///
/// let mut stage = DualAxisStage::<SimAxis, SimAxis>::open(
///     "z_stage",
///     SimLink::new("COM7"),
///     SimLink::new("COM9"),
///     (0.0, 50.0), // limits in mm
///     500.0,       // velocity in mm/s
///     1000.0,      // acceleration in mm/s²
/// )?;
///
/// stage.move_mm(25.0, false, true)?;
/// let (a, b) = stage.positions_mm();
/// assert_eq!(a, b);
///
/// stage.stop(StopMode::Abrupt)?;
/// stage.close()?;
/// # Ok::<(), zstage::StageError>(())
/// ```
#[derive(Debug)]
pub struct DualAxisStage<A: StageAxis, B: StageAxis> {
    name: String,
    axis_a: A,
    axis_b: B,
    limits_mm: (f64, f64),
    velocity_mmps: f64,
}

impl<A: StageAxis, B: StageAxis> DualAxisStage<A, B> {
    /// Open both axis links, home both axes if either is unhomed, and
    /// equalize away any startup position mismatch.
    ///
    /// Homing on open is disabled at the driver level; the stage coordinates
    /// homing itself so the two routines overlap in time instead of running
    /// back-to-back.
    ///
    /// # Errors
    ///
    /// [`AxisError::Connection`](crate::AxisError::Connection) if either link
    /// cannot be opened, [`AxisError::Homing`](crate::AxisError::Homing) if
    /// either axis fails to home. In both cases any already-opened link is
    /// closed before returning: a failed open leaves no usable instance and
    /// no leaked handle.
    pub fn open(
        name: &str,
        link_a: A::Link,
        link_b: B::Link,
        limits_mm: (f64, f64),
        velocity_mmps: f64,
        acceleration_mmpss: f64,
    ) -> StageResult<Self> {
        info!("{name}: opening");
        let config = AxisConfig::new(limits_mm, velocity_mmps, acceleration_mmpss);

        let mut axis_a = A::open(link_a, &config).map_err(|e| StageError::on(AxisId::A, e))?;
        let axis_b = match B::open(link_b, &config) {
            Ok(axis) => axis,
            Err(e) => {
                let _ = axis_a.close();
                return Err(StageError::on(AxisId::B, e));
            }
        };

        let mut stage = Self {
            name: name.to_string(),
            axis_a,
            axis_b,
            limits_mm,
            velocity_mmps,
        };
        if let Err(e) = stage.home_if_needed().and_then(|()| stage.equalize()) {
            let _ = stage.axis_a.close();
            let _ = stage.axis_b.close();
            return Err(e);
        }
        info!("{name}: done opening");
        Ok(stage)
    }

    /// Home both axes concurrently if either reports unhomed.
    fn home_if_needed(&mut self) -> StageResult<()> {
        if self.axis_a.is_homed() && self.axis_b.is_homed() {
            return Ok(());
        }
        debug!("{}: homing both axes", self.name);
        // Begin both before awaiting either so the two routines overlap.
        self.axis_a
            .begin_home()
            .map_err(|e| StageError::on(AxisId::A, e))?;
        self.axis_b
            .begin_home()
            .map_err(|e| StageError::on(AxisId::B, e))?;
        self.axis_a
            .await_home()
            .map_err(|e| StageError::on(AxisId::A, e))?;
        self.axis_b
            .await_home()
            .map_err(|e| StageError::on(AxisId::B, e))?;
        debug!("{}: both axes homed", self.name);
        Ok(())
    }

    // ==================== Motion Commands ====================

    /// Apply the same velocity to both axes.
    ///
    /// Best-effort, not atomic: both axes are always commanded, and a
    /// rejection by one does not roll the other back. The stored shared
    /// velocity is only updated once both accept.
    pub fn set_velocity_mmps(&mut self, velocity_mmps: f64) -> StageResult<()> {
        info!("{}: setting velocity_mmps = {:.3}", self.name, velocity_mmps);
        let res_a = self
            .axis_a
            .set_velocity_mmps(velocity_mmps)
            .map_err(|e| StageError::on(AxisId::A, e));
        let res_b = self
            .axis_b
            .set_velocity_mmps(velocity_mmps)
            .map_err(|e| StageError::on(AxisId::B, e));
        res_a?;
        res_b?;
        self.velocity_mmps = velocity_mmps;
        Ok(())
    }

    /// Command the same move on both axes.
    ///
    /// Both dispatches happen before any wait, so the axes start moving
    /// together; sequential dispatch-and-wait would let one axis start
    /// noticeably before the other, reintroducing the mismatch this stage
    /// exists to prevent. Both dispatch attempts are always made: a rejection
    /// on one axis never suppresses the command to the other.
    ///
    /// With `block` set, waits for both moves to settle before returning.
    /// Otherwise returns right after dispatch; the caller synchronizes later
    /// via [`stop`](Self::stop) plus [`equalize`](Self::equalize) or a
    /// subsequent blocking call.
    ///
    /// # Errors
    ///
    /// [`AxisError::Rejected`](crate::AxisError::Rejected) naming the
    /// rejecting axis, e.g. for a target outside its travel limits. Motion
    /// already dispatched to the other axis is not cancelled.
    pub fn move_mm(&mut self, target_mm: f64, relative: bool, block: bool) -> StageResult<()> {
        info!(
            "{}: move_mm = {:.2} (relative={relative})",
            self.name, target_mm
        );
        let res_a = self
            .axis_a
            .begin_move_mm(target_mm, relative)
            .map_err(|e| StageError::on(AxisId::A, e));
        let res_b = self
            .axis_b
            .begin_move_mm(target_mm, relative)
            .map_err(|e| StageError::on(AxisId::B, e));
        res_a?;
        res_b?;
        if block {
            self.axis_a
                .await_move()
                .map_err(|e| StageError::on(AxisId::A, e))?;
            self.axis_b
                .await_move()
                .map_err(|e| StageError::on(AxisId::B, e))?;
            debug!("{}: move settled", self.name);
        }
        Ok(())
    }

    /// Stop both axes with the same mode, dispatched to both before
    /// returning.
    ///
    /// Always safe to call, including on an idle stage. Does not
    /// re-equalize: callers needing a settled, matched position afterwards
    /// call [`equalize`](Self::equalize) explicitly.
    pub fn stop(&mut self, mode: StopMode) -> StageResult<()> {
        info!("{}: stopping (mode={mode})", self.name);
        let res_a = self
            .axis_a
            .stop(mode)
            .map_err(|e| StageError::on(AxisId::A, e));
        let res_b = self
            .axis_b
            .stop(mode)
            .map_err(|e| StageError::on(AxisId::B, e));
        res_a?;
        res_b
    }

    /// Reconcile any position mismatch between the two axes.
    ///
    /// Takes a fresh position read of both axes at the moment of the call.
    /// If they differ, the axis with the smaller position is moved forward
    /// to the larger position (absolute, blocking). Forward correction only:
    /// both actuators move faster in the positive direction, so driving the
    /// lagging axis up is the lower-latency choice. No-op when the positions
    /// already match.
    ///
    /// Always blocking, regardless of any caller block preference:
    /// mismatched axes must never be observable as a settled stage.
    pub fn equalize(&mut self) -> StageResult<()> {
        let pos_a = self.axis_a.position_mm();
        let pos_b = self.axis_b.position_mm();
        if pos_a < pos_b {
            debug!(
                "{}: equalizing, axis A {:.4} -> {:.4}",
                self.name, pos_a, pos_b
            );
            self.axis_a
                .begin_move_mm(pos_b, false)
                .and_then(|()| self.axis_a.await_move())
                .map_err(|e| StageError::on(AxisId::A, e))?;
        } else if pos_a > pos_b {
            debug!(
                "{}: equalizing, axis B {:.4} -> {:.4}",
                self.name, pos_b, pos_a
            );
            self.axis_b
                .begin_move_mm(pos_a, false)
                .and_then(|()| self.axis_b.await_move())
                .map_err(|e| StageError::on(AxisId::B, e))?;
        }
        Ok(())
    }

    /// Equalize, then release both links.
    ///
    /// Consumes the stage, so a second close cannot be expressed. Both links
    /// are released even when the final equalize fails; the first failure is
    /// reported after release.
    pub fn close(mut self) -> StageResult<()> {
        info!("{}: closing", self.name);
        let settled = self.equalize();
        let res_a = self
            .axis_a
            .close()
            .map_err(|e| StageError::on(AxisId::A, e));
        let res_b = self
            .axis_b
            .close()
            .map_err(|e| StageError::on(AxisId::B, e));
        settled?;
        res_a?;
        res_b?;
        info!("{}: closed", self.name);
        Ok(())
    }

    // ==================== Diagnostics ====================

    /// Both axes' last reported positions in mm, `(A, B)`. Non-blocking;
    /// reflects the last reported values, not a guaranteed-fresh sample.
    pub fn positions_mm(&self) -> (f64, f64) {
        (self.axis_a.position_mm(), self.axis_b.position_mm())
    }

    /// Stage name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session travel limits in mm.
    pub fn limits_mm(&self) -> (f64, f64) {
        self.limits_mm
    }

    /// Shared velocity in mm/s last accepted by both axes.
    pub fn velocity_mmps(&self) -> f64 {
        self.velocity_mmps
    }

    /// Read-only access to the first axis, for per-axis display.
    pub fn axis_a(&self) -> &A {
        &self.axis_a
    }

    /// Read-only access to the second axis, for per-axis display.
    pub fn axis_b(&self) -> &B {
        &self.axis_b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{AxisError, StageError};
    use crate::sim::{SimAxis, SimLink};
    use approx::assert_relative_eq;
    use std::thread::sleep;
    use std::time::Duration;

    const LIMITS_MM: (f64, f64) = (0.0, 50.0);
    // Fast enough that blocking waits are a few ms in tests.
    const VELOCITY_MMPS: f64 = 1000.0;
    const ACCEL_MMPSS: f64 = 2000.0;

    fn open_stage(link_a: SimLink, link_b: SimLink) -> DualAxisStage<SimAxis, SimAxis> {
        DualAxisStage::open(
            "test_stage",
            link_a,
            link_b,
            LIMITS_MM,
            VELOCITY_MMPS,
            ACCEL_MMPSS,
        )
        .unwrap()
    }

    #[test]
    fn open_homes_unhomed_axes_and_equalizes() {
        let stage = open_stage(SimLink::new("sim-a").at(3.2), SimLink::new("sim-b").at(7.7));
        assert!(stage.axis_a().is_homed());
        assert!(stage.axis_b().is_homed());
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 0.0, epsilon = 1e-9);
        assert_relative_eq!(b, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn open_equalizes_forward_only() {
        // Both pre-homed at different resting positions: only the lower
        // axis (A) may move, up to B's position.
        let stage = open_stage(
            SimLink::new("sim-a").at(5.0).homed(),
            SimLink::new("sim-b").at(10.0).homed(),
        );
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 10.0, epsilon = 1e-9);
        assert_relative_eq!(b, 10.0, epsilon = 1e-9);
        assert_eq!(stage.axis_a().moves_issued(), 1);
        assert_eq!(stage.axis_b().moves_issued(), 0);
    }

    #[test]
    fn open_fails_cleanly_on_unreachable_link() {
        let result = DualAxisStage::<SimAxis, SimAxis>::open(
            "test_stage",
            SimLink::new("sim-a"),
            SimLink::new("sim-b").unreachable(),
            LIMITS_MM,
            VELOCITY_MMPS,
            ACCEL_MMPSS,
        );
        match result {
            Err(StageError::Axis {
                axis: AxisId::B,
                source: AxisError::Connection(_),
            }) => {}
            other => panic!("expected connection failure on axis B, got {other:?}"),
        }
    }

    #[test]
    fn open_fails_cleanly_on_homing_failure() {
        let result = DualAxisStage::<SimAxis, SimAxis>::open(
            "test_stage",
            SimLink::new("sim-a").at(2.0),
            SimLink::new("sim-b").at(4.0).failing_homing(),
            LIMITS_MM,
            VELOCITY_MMPS,
            ACCEL_MMPSS,
        );
        match result {
            Err(StageError::Axis {
                axis: AxisId::B,
                source: AxisError::Homing(_),
            }) => {}
            other => panic!("expected homing failure on axis B, got {other:?}"),
        }
    }

    #[test]
    fn blocking_moves_land_both_axes_on_target() {
        let mut stage = open_stage(SimLink::new("sim-a"), SimLink::new("sim-b"));
        stage.move_mm(25.0, false, true).unwrap();
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 25.0, epsilon = 1e-9);
        assert_relative_eq!(b, 25.0, epsilon = 1e-9);

        stage.move_mm(5.0, true, true).unwrap();
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 30.0, epsilon = 1e-9);
        assert_relative_eq!(b, 30.0, epsilon = 1e-9);
    }

    #[test]
    fn equalize_is_idempotent() {
        let mut stage = open_stage(
            SimLink::new("sim-a").at(5.0).homed(),
            SimLink::new("sim-b").at(10.0).homed(),
        );
        let before = stage.positions_mm();
        let issued = (
            stage.axis_a().moves_issued(),
            stage.axis_b().moves_issued(),
        );
        stage.equalize().unwrap();
        assert_eq!(stage.positions_mm(), before);
        assert_eq!(stage.axis_a().moves_issued(), issued.0);
        assert_eq!(stage.axis_b().moves_issued(), issued.1);
    }

    #[test]
    fn out_of_limits_move_is_rejected_with_axis_identity() {
        let mut stage = open_stage(SimLink::new("sim-a"), SimLink::new("sim-b"));
        let err = stage.move_mm(60.0, false, true).unwrap_err();
        assert_eq!(err.axis(), AxisId::A);
        assert!(matches!(
            err,
            StageError::Axis {
                source: AxisError::Rejected(_),
                ..
            }
        ));
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 0.0, epsilon = 1e-9);
        assert_relative_eq!(b, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn one_axis_rejection_leaves_other_motion_running_until_equalize() {
        // Axis A rejects the next move; axis B accepts and keeps moving.
        let mut stage = open_stage(
            SimLink::new("sim-a").homed().rejecting_next_move(),
            SimLink::new("sim-b").homed(),
        );
        let err = stage.move_mm(25.0, false, false).unwrap_err();
        assert_eq!(err.axis(), AxisId::A);

        // B's motion was dispatched and is not cancelled by the core.
        sleep(Duration::from_millis(50));
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 0.0, epsilon = 1e-9);
        assert_relative_eq!(b, 25.0, epsilon = 1e-9);

        // The next equalize reconciles A up to B's resulting position.
        stage.equalize().unwrap();
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 25.0, epsilon = 1e-9);
        assert_relative_eq!(b, 25.0, epsilon = 1e-9);
    }

    #[test]
    fn non_blocking_move_returns_early_and_stop_settles() {
        let mut stage = DualAxisStage::<SimAxis, SimAxis>::open(
            "test_stage",
            SimLink::new("sim-a"),
            SimLink::new("sim-b"),
            LIMITS_MM,
            // Slow enough that the move is still in flight when we stop.
            50.0,
            ACCEL_MMPSS,
        )
        .unwrap();

        stage.move_mm(40.0, false, false).unwrap();
        let (a, b) = stage.positions_mm();
        assert!(a < 40.0 && b < 40.0);

        sleep(Duration::from_millis(20));
        stage.stop(StopMode::Abrupt).unwrap();
        let (a, b) = stage.positions_mm();
        assert!(a > 0.0 && a < 40.0, "stopped mid-travel, got {a}");
        assert!(b > 0.0 && b < 40.0, "stopped mid-travel, got {b}");

        stage.equalize().unwrap();
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, b, epsilon = 1e-9);
    }

    #[test]
    fn stop_on_idle_stage_is_a_no_op() {
        let mut stage = open_stage(SimLink::new("sim-a"), SimLink::new("sim-b"));
        stage.move_mm(10.0, false, true).unwrap();
        let before = stage.positions_mm();
        stage.stop(StopMode::Abrupt).unwrap();
        stage.stop(StopMode::Profiled).unwrap();
        assert_eq!(stage.positions_mm(), before);
    }

    #[test]
    fn velocity_applies_to_both_axes_and_rejection_names_axis() {
        let mut stage = open_stage(SimLink::new("sim-a"), SimLink::new("sim-b"));
        stage.set_velocity_mmps(2.5).unwrap();
        assert_relative_eq!(stage.velocity_mmps(), 2.5, epsilon = 1e-12);
        assert_relative_eq!(stage.axis_a().velocity_mmps(), 2.5, epsilon = 1e-12);
        assert_relative_eq!(stage.axis_b().velocity_mmps(), 2.5, epsilon = 1e-12);

        let err = stage.set_velocity_mmps(-1.0).unwrap_err();
        assert_eq!(err.axis(), AxisId::A);
        // Stored shared velocity is unchanged after a rejection.
        assert_relative_eq!(stage.velocity_mmps(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn full_session_scenario() {
        // Unhomed axes at arbitrary resting positions.
        let mut stage = open_stage(SimLink::new("sim-a").at(12.3), SimLink::new("sim-b").at(0.7));
        assert!(stage.axis_a().is_homed() && stage.axis_b().is_homed());
        let (a, b) = stage.positions_mm();
        assert_relative_eq!(a, 0.0, epsilon = 1e-9);
        assert_relative_eq!(b, 0.0, epsilon = 1e-9);

        stage.move_mm(25.0, false, true).unwrap();
        assert_relative_eq!(stage.positions_mm().0, 25.0, epsilon = 1e-9);
        assert_relative_eq!(stage.positions_mm().1, 25.0, epsilon = 1e-9);

        stage.move_mm(5.0, true, true).unwrap();
        assert_relative_eq!(stage.positions_mm().0, 30.0, epsilon = 1e-9);
        assert_relative_eq!(stage.positions_mm().1, 30.0, epsilon = 1e-9);

        stage.stop(StopMode::Abrupt).unwrap();
        assert_relative_eq!(stage.positions_mm().0, 30.0, epsilon = 1e-9);

        stage.close().unwrap();
    }
}
