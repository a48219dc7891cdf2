//! CLI tool for exercising the dual-actuator Z stage against simulated axes.
//!
//! Subcommands:
//! - `demo`: the bring-up sequence (random moves, move-and-stop both ways,
//!   return to zero)
//! - `sweep`: random absolute blocking moves
//! - `jog`: non-blocking move, hold, stop, equalize

use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;
use zstage::{DualAxisStage, SimAxis, SimLink, StopMode};

/// Dual-actuator Z stage exercise tool (simulated hardware)
#[derive(Parser, Debug)]
#[command(name = "stage_tool")]
#[command(about = "Exercise the dual-actuator Z stage coordination core")]
#[command(version)]
struct Args {
    /// Port label for axis A
    #[arg(long, global = true, default_value = "COM7")]
    port_a: String,

    /// Port label for axis B
    #[arg(long, global = true, default_value = "COM9")]
    port_b: String,

    /// Lower travel limit in mm
    #[arg(long, global = true, default_value = "0.0")]
    limit_min: f64,

    /// Upper travel limit in mm
    #[arg(long, global = true, default_value = "50.0")]
    limit_max: f64,

    /// Velocity in mm/s
    #[arg(long, global = true, default_value = "1.0")]
    velocity: f64,

    /// Acceleration in mm/s²
    #[arg(long, global = true, default_value = "2.0")]
    accel: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bring-up sequence: random moves, move-and-stop, return to zero
    Demo,

    /// Random absolute blocking moves
    Sweep {
        /// Number of moves
        #[arg(short, long, default_value = "3")]
        count: u32,

        /// Upper bound for random targets in mm
        #[arg(short, long, default_value = "5.0")]
        max_mm: f64,
    },

    /// Non-blocking move, hold, stop, equalize
    Jog {
        /// Target in mm
        target_mm: f64,

        /// Interpret the target relative to the current position
        #[arg(short, long)]
        relative: bool,

        /// How long to let the motion run before stopping, in ms
        #[arg(long, default_value = "500")]
        hold_ms: u64,

        /// Stop mode: abrupt or profiled
        #[arg(short, long, default_value = "abrupt")]
        mode: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut stage = DualAxisStage::<SimAxis, SimAxis>::open(
        "z_stage",
        SimLink::new(&args.port_a).at(3.1),
        SimLink::new(&args.port_b).at(7.4),
        (args.limit_min, args.limit_max),
        args.velocity,
        args.accel,
    )?;
    report(&stage);

    match args.command {
        Command::Demo => {
            let mut rng = rand::rng();
            for i in 0..3 {
                let target_mm = rng.random_range(0.0..=5.0);
                info!("random move #{i}: {target_mm:.2} mm");
                stage.move_mm(target_mm, false, true)?;
                report(&stage);
            }

            info!("move and stop, both modes");
            stage.move_mm(1.0, false, false)?;
            stage.stop(StopMode::Abrupt)?;
            stage.equalize()?;
            stage.move_mm(1.0, false, false)?;
            stage.stop(StopMode::Profiled)?;
            stage.equalize()?;
            report(&stage);

            stage.move_mm(0.0, false, true)?;
        }
        Command::Sweep { count, max_mm } => {
            let mut rng = rand::rng();
            for i in 0..count {
                let target_mm = rng.random_range(args.limit_min..=max_mm.min(args.limit_max));
                info!("sweep move #{i}: {target_mm:.2} mm");
                stage.move_mm(target_mm, false, true)?;
                report(&stage);
            }
            stage.move_mm(args.limit_min, false, true)?;
        }
        Command::Jog {
            target_mm,
            relative,
            hold_ms,
            mode,
        } => {
            let mode = StopMode::from_str(&mode)
                .map_err(|_| anyhow!("unknown stop mode {mode:?}, expected abrupt or profiled"))?;
            stage.move_mm(target_mm, relative, false)?;
            thread::sleep(Duration::from_millis(hold_ms));
            stage.stop(mode)?;
            stage.equalize()?;
            report(&stage);
        }
    }

    stage.close()?;
    info!("done");
    Ok(())
}

fn report(stage: &DualAxisStage<SimAxis, SimAxis>) {
    let (a, b) = stage.positions_mm();
    info!("{}: axis A = {a:.3} mm, axis B = {b:.3} mm", stage.name());
}
