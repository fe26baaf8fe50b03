//! One control tick: acquire, calibrate, smooth, decide.
//!
//! The stages run strictly in that order on data from the same tick. A
//! failed acquisition or a reference fault abandons the tick before anything
//! is published, so the smoother, the shared voltages, the mode and the
//! lines all keep their previous values. The watchdog is fed either way.

use core::fmt;

use crate::analog::{AcquireError, Channel, Sampler};
use crate::calibration::{CalibrationError, Calibrator};
use crate::config::{UpsConfig, SMOOTHING_DEPTH};
use crate::control_state::ControlState;
use crate::power::{PowerInputs, PowerLines, PowerState, PowerStateMachine, Transition};
use crate::smoothing::Smoother;

/// Liveness acknowledgement towards an external reset timer.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Why a tick was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickError {
    Acquisition(AcquireError),
    Calibration(CalibrationError),
}

impl From<AcquireError> for TickError {
    fn from(err: AcquireError) -> Self {
        TickError::Acquisition(err)
    }
}

impl From<CalibrationError> for TickError {
    fn from(err: CalibrationError) -> Self {
        TickError::Calibration(err)
    }
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Acquisition(err) => write!(f, "acquisition failed: {err}"),
            TickError::Calibration(err) => write!(f, "calibration failed: {err}"),
        }
    }
}

/// Owns the per-tick pipeline: calibration, smoothing and the charge
/// controller. Shared state is passed in on every call.
pub struct Supervisor {
    calibrator: Calibrator,
    smoother: Smoother<SMOOTHING_DEPTH>,
    machine: PowerStateMachine,
}

impl Supervisor {
    /// Builds the pipeline from board constants. Lines are untouched until
    /// [`Supervisor::start`].
    pub fn new(config: &UpsConfig) -> Self {
        Self {
            calibrator: Calibrator::new(config.calibration),
            smoother: Smoother::new(config.smoothing_seeds),
            machine: PowerStateMachine::new(config.limits),
        }
    }

    /// Mode of the charge controller.
    pub fn state(&self) -> PowerState {
        self.machine.state()
    }

    /// Drives the lines to the `Idle` levels and publishes the initial mode.
    pub fn start(&self, lines: &mut impl PowerLines, shared: &ControlState) {
        self.machine.init_lines(lines);
        shared.publish_state(self.machine.state());
        info!("supervisor started in {}", self.machine.state());
    }

    /// Runs one tick and feeds the watchdog.
    ///
    /// `Ok(None)` means the tick completed without a mode change.
    pub async fn tick(
        &mut self,
        sampler: &mut impl Sampler,
        lines: &mut impl PowerLines,
        watchdog: &mut impl Watchdog,
        shared: &ControlState,
    ) -> Result<Option<Transition>, TickError> {
        let result = self.run(sampler, lines, shared).await;
        match &result {
            Ok(_) => shared.record_tick(),
            Err(err) => {
                warn!("tick skipped: {}", err);
                shared.record_skip();
            }
        }
        watchdog.feed();
        result
    }

    async fn run(
        &mut self,
        sampler: &mut impl Sampler,
        lines: &mut impl PowerLines,
        shared: &ControlState,
    ) -> Result<Option<Transition>, TickError> {
        let frame = sampler.acquire().await?;
        let calibrated = self.calibrator.calibrate(&frame)?;
        let smoothed = self.smoother.update(&calibrated);
        shared.publish_voltages(&smoothed);

        let cutoffs = shared.cutoffs();
        let inputs = PowerInputs {
            bus_mv: smoothed[Channel::Bus],
            battery_mv: smoothed[Channel::Battery],
            charge_cutoff_mv: cutoffs.charge_mv,
            idle_discharge_cutoff_mv: cutoffs.idle_discharge_mv,
        };

        let transition = self.machine.step(&inputs, lines);
        if let Some(t) = transition {
            info!(
                "{} -> {} (bus {}mV, battery {}mV)",
                t.from, t.to, inputs.bus_mv, inputs.battery_mv
            );
            shared.publish_state(t.to);
        }
        Ok(transition)
    }
}
