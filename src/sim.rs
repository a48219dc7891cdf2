//! Simulated linear actuator for tests and bench-free bring-up.
//!
//! [`SimAxis`] implements the [`StageAxis`] contract against a kinematic
//! model instead of a serial link: a commanded move captures the start
//! position, start instant and target, and the reported position is
//! interpolated along that profile at the configured velocity. Waits sleep
//! out the remaining travel time, bounded by the per-wait timeout.
//!
//! [`SimLink`] describes the pretend hardware behind a port label: whether it
//! answers at all, where the carriage is resting, whether it was homed in a
//! previous session, an optional hardware travel range narrower than the
//! session limits, and fault-injection knobs used by the tests.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::axis::{AxisConfig, AxisError, AxisResult, StageAxis, StopMode};

/// Default bound on a single motion or homing wait.
///
/// Generous for a lead screw crossing its full travel at low velocity; a
/// wait that exceeds this indicates a stalled or disconnected controller.
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection spec for a [`SimAxis`]: the pretend hardware behind a port.
#[derive(Debug, Clone)]
pub struct SimLink {
    label: String,
    reachable: bool,
    resting_mm: f64,
    homed: bool,
    hardware_limits_mm: Option<(f64, f64)>,
    fail_homing: bool,
    reject_next_move: bool,
}

impl SimLink {
    /// A reachable, unhomed axis resting at 0.0 mm.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            reachable: true,
            resting_mm: 0.0,
            homed: false,
            hardware_limits_mm: None,
            fail_homing: false,
            reject_next_move: false,
        }
    }

    /// Set the resting position in mm.
    pub fn at(mut self, position_mm: f64) -> Self {
        self.resting_mm = position_mm;
        self
    }

    /// Mark the axis as already homed in a previous session.
    pub fn homed(mut self) -> Self {
        self.homed = true;
        self
    }

    /// Controller travel range, when narrower than the session limits.
    pub fn hardware_limits(mut self, min_mm: f64, max_mm: f64) -> Self {
        self.hardware_limits_mm = Some((min_mm, max_mm));
        self
    }

    /// Fault injection: the link never answers, so `open` fails.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Fault injection: the homing routine reports a fault.
    pub fn failing_homing(mut self) -> Self {
        self.fail_homing = true;
        self
    }

    /// Fault injection: the first commanded move is rejected.
    pub fn rejecting_next_move(mut self) -> Self {
        self.reject_next_move = true;
        self
    }
}

/// One motion in flight: position interpolates from `from_mm` toward
/// `target_mm` at `velocity_mmps`, starting at `started`.
#[derive(Debug, Clone, Copy)]
struct Motion {
    from_mm: f64,
    target_mm: f64,
    velocity_mmps: f64,
    started: Instant,
    homing: bool,
}

impl Motion {
    fn duration(&self) -> Duration {
        Duration::from_secs_f64((self.target_mm - self.from_mm).abs() / self.velocity_mmps)
    }

    fn eta(&self) -> Instant {
        self.started + self.duration()
    }

    fn position_at(&self, now: Instant) -> f64 {
        let travelled = self.velocity_mmps * now.duration_since(self.started).as_secs_f64();
        let span = self.target_mm - self.from_mm;
        if travelled >= span.abs() {
            self.target_mm
        } else {
            self.from_mm + span.signum() * travelled
        }
    }
}

/// Simulated actuator implementing [`StageAxis`].
#[derive(Debug)]
pub struct SimAxis {
    label: String,
    limits_mm: (f64, f64),
    velocity_mmps: f64,
    acceleration_mmpss: f64,
    homed: bool,
    position_mm: f64,
    motion: Option<Motion>,
    wait_timeout: Duration,
    fail_homing: bool,
    reject_next_move: bool,
    moves_issued: u32,
}

impl SimAxis {
    /// Port label this axis was opened on.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Effective travel limits in mm (session limits intersected with the
    /// controller's own range).
    pub fn limits_mm(&self) -> (f64, f64) {
        self.limits_mm
    }

    /// Currently applied velocity in mm/s.
    pub fn velocity_mmps(&self) -> f64 {
        self.velocity_mmps
    }

    /// Number of accepted move commands so far. Homing runs not included.
    pub fn moves_issued(&self) -> u32 {
        self.moves_issued
    }

    /// Bound a single motion or homing wait. Default is 30 s.
    pub fn set_wait_timeout(&mut self, timeout: Duration) {
        self.wait_timeout = timeout;
    }

    /// Fault injection: reject the next commanded move.
    pub fn inject_move_rejection(&mut self) {
        self.reject_next_move = true;
    }

    /// Sleep until `motion` settles, within the wait bound. On success the
    /// settled position is committed; on timeout the motion stays in flight.
    fn await_motion(&mut self, operation: &'static str) -> AxisResult<()> {
        let Some(motion) = self.motion.take() else {
            return Ok(());
        };
        let remaining = motion.eta().saturating_duration_since(Instant::now());
        if remaining > self.wait_timeout {
            self.motion = Some(motion);
            thread::sleep(self.wait_timeout);
            return Err(AxisError::Timeout(self.wait_timeout, operation));
        }
        thread::sleep(remaining);
        self.position_mm = motion.target_mm;
        if motion.homing {
            self.homed = true;
        }
        Ok(())
    }
}

impl StageAxis for SimAxis {
    type Link = SimLink;

    fn open(link: SimLink, config: &AxisConfig) -> AxisResult<Self> {
        if !link.reachable {
            return Err(AxisError::Connection(format!(
                "no response on {}",
                link.label
            )));
        }
        let (mut min_mm, mut max_mm) = config.limits_mm;
        if let Some((hw_min, hw_max)) = link.hardware_limits_mm {
            min_mm = min_mm.max(hw_min);
            max_mm = max_mm.min(hw_max);
        }
        if !(min_mm < max_mm) || config.velocity_mmps <= 0.0 || config.acceleration_mmpss <= 0.0 {
            return Err(AxisError::Connection(format!(
                "{}: invalid axis configuration (limits [{min_mm}, {max_mm}] mm, \
                 velocity {} mm/s, acceleration {} mm/s²)",
                link.label, config.velocity_mmps, config.acceleration_mmpss
            )));
        }
        debug!(
            "{}: opened (limits [{min_mm}, {max_mm}] mm, homed={})",
            link.label, link.homed
        );
        let mut axis = Self {
            label: link.label,
            limits_mm: (min_mm, max_mm),
            velocity_mmps: config.velocity_mmps,
            acceleration_mmpss: config.acceleration_mmpss,
            homed: link.homed,
            position_mm: link.resting_mm,
            motion: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            fail_homing: link.fail_homing,
            reject_next_move: link.reject_next_move,
            moves_issued: 0,
        };
        if config.home_on_open && !axis.homed {
            axis.begin_home()?;
            axis.await_home()?;
        }
        Ok(axis)
    }

    fn is_homed(&self) -> bool {
        self.homed
    }

    fn begin_home(&mut self) -> AxisResult<()> {
        let from_mm = self.position_mm();
        debug!("{}: homing from {:.3} mm", self.label, from_mm);
        self.motion = Some(Motion {
            from_mm,
            target_mm: 0.0,
            velocity_mmps: self.velocity_mmps,
            started: Instant::now(),
            homing: true,
        });
        Ok(())
    }

    fn await_home(&mut self) -> AxisResult<()> {
        if self.fail_homing {
            if let Some(motion) = self.motion.take() {
                self.position_mm = motion.position_at(Instant::now());
            }
            return Err(AxisError::Homing(format!(
                "{}: home switch never engaged",
                self.label
            )));
        }
        self.await_motion("home")
    }

    fn set_velocity_mmps(&mut self, velocity_mmps: f64) -> AxisResult<()> {
        if !velocity_mmps.is_finite() || velocity_mmps <= 0.0 {
            return Err(AxisError::Rejected(format!(
                "{}: unsupported velocity {velocity_mmps} mm/s",
                self.label
            )));
        }
        self.velocity_mmps = velocity_mmps;
        Ok(())
    }

    fn begin_move_mm(&mut self, target_mm: f64, relative: bool) -> AxisResult<()> {
        if self.reject_next_move {
            self.reject_next_move = false;
            return Err(AxisError::Rejected(format!(
                "{}: rejected by fault injection",
                self.label
            )));
        }
        let from_mm = self.position_mm();
        let target_mm = if relative { from_mm + target_mm } else { target_mm };
        let (min_mm, max_mm) = self.limits_mm;
        if !target_mm.is_finite() || target_mm < min_mm || target_mm > max_mm {
            return Err(AxisError::Rejected(format!(
                "{}: target {target_mm:.3} mm outside limits [{min_mm}, {max_mm}] mm",
                self.label
            )));
        }
        debug!("{}: move {:.3} -> {:.3} mm", self.label, from_mm, target_mm);
        // A move commanded while one is outstanding supersedes it: the
        // profile restarts from the current interpolated position.
        self.motion = Some(Motion {
            from_mm,
            target_mm,
            velocity_mmps: self.velocity_mmps,
            started: Instant::now(),
            homing: false,
        });
        self.moves_issued += 1;
        Ok(())
    }

    fn await_move(&mut self) -> AxisResult<()> {
        self.await_motion("move")
    }

    fn stop(&mut self, mode: StopMode) -> AxisResult<()> {
        let Some(motion) = self.motion.take() else {
            return Ok(());
        };
        let here_mm = motion.position_at(Instant::now());
        let settled_mm = match mode {
            StopMode::Abrupt => here_mm,
            StopMode::Profiled => {
                // Coasts the deceleration distance v²/2a toward the target,
                // never past it.
                let coast_mm =
                    motion.velocity_mmps * motion.velocity_mmps / (2.0 * self.acceleration_mmpss);
                let span = motion.target_mm - motion.from_mm;
                let coasted = here_mm + span.signum() * coast_mm;
                if span >= 0.0 {
                    coasted.min(motion.target_mm)
                } else {
                    coasted.max(motion.target_mm)
                }
            }
        };
        self.position_mm = settled_mm.clamp(self.limits_mm.0, self.limits_mm.1);
        debug!(
            "{}: stopped ({mode}) at {:.3} mm",
            self.label, self.position_mm
        );
        Ok(())
    }

    fn position_mm(&self) -> f64 {
        match &self.motion {
            Some(motion) => motion.position_at(Instant::now()),
            None => self.position_mm,
        }
    }

    fn close(&mut self) -> AxisResult<()> {
        if self.motion.is_some() {
            self.stop(StopMode::Abrupt)?;
        }
        debug!("{}: closed at {:.3} mm", self.label, self.position_mm);
        Ok(())
    }
}
