//! Coordinated control for a dual-actuator vertical stage.
//!
//! Two lead-screw actuators, each with its own controller and link, are
//! mechanically coupled to one platform. This crate makes the pair behave as
//! a single Z axis: [`DualAxisStage`] coordinates homing, dispatches every
//! move and stop to both axes before waiting on either, and reconciles drift
//! by driving the lagging axis forward ([`equalize`]).
//!
//! The per-controller drivers are collaborators behind the [`StageAxis`]
//! contract; [`SimAxis`] is the bundled simulated implementation used by the
//! tests and the `stage_tool` binary.
//!
//! # Example
//!
//! ```
//! use zstage::{DualAxisStage, SimAxis, SimLink};
//!
//! let mut stage = DualAxisStage::<SimAxis, SimAxis>::open(
//!     "z_stage",
//!     SimLink::new("COM7"),
//!     SimLink::new("COM9"),
//!     (0.0, 50.0),
//!     500.0,
//!     1000.0,
//! )?;
//!
//! stage.move_mm(25.0, false, true)?;
//! let (a, b) = stage.positions_mm();
//! assert_eq!((a, b), (25.0, 25.0));
//!
//! stage.close()?;
//! # Ok::<(), zstage::StageError>(())
//! ```
//!
//! [`equalize`]: DualAxisStage::equalize

pub mod axis;
pub mod sim;
pub mod stage;

pub use axis::{
    AxisConfig, AxisError, AxisId, AxisResult, StageAxis, StageError, StageResult, StopMode,
};
pub use sim::{SimAxis, SimLink};
pub use stage::DualAxisStage;
