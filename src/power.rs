//! Power path outputs and the supervisor task.
//!
//! The three paths are switched by push-pull outputs; the control core
//! decides which ones are on. Nothing reads the lines back, so a stuck
//! MOSFET goes unnoticed until the voltages drift.

use core::convert::Infallible;

use embassy_stm32::{gpio::Output, wdg::IndependentWatchdog};
use embassy_time::{Duration, Ticker};
use embedded_hal::digital::v2::OutputPin;
use ups12v_core::{
    ControlState, PowerLine, PowerLines, Supervisor, UpsConfig, Watchdog,
    config::SUPERVISOR_PERIOD_MS,
};

use crate::adc::AdcSampler;

/// Power path outputs, active high.
pub struct GpioPowerLines<P = Output<'static>> {
    /// Connects the pack to the charger node (BAT_EN)
    battery: P,
    /// Maintenance charge path (TRICKLE_EN)
    trickle: P,
    /// Full-current charge path (CHRG_EN)
    charge: P,
}

impl<P: OutputPin<Error = Infallible>> GpioPowerLines<P> {
    pub fn new(battery: P, trickle: P, charge: P) -> Self {
        Self {
            battery,
            trickle,
            charge,
        }
    }

    fn pin(&mut self, line: PowerLine) -> &mut P {
        match line {
            PowerLine::Battery => &mut self.battery,
            PowerLine::Trickle => &mut self.trickle,
            PowerLine::Charge => &mut self.charge,
        }
    }
}

impl<P: OutputPin<Error = Infallible>> PowerLines for GpioPowerLines<P> {
    fn enable(&mut self, line: PowerLine) {
        let Ok(()) = self.pin(line).set_high();
    }

    fn disable(&mut self, line: PowerLine) {
        let Ok(()) = self.pin(line).set_low();
    }
}

/// IWDG, started by the supervisor task once its loop is about to run.
pub struct IwdgWatchdog {
    wdg: IndependentWatchdog<'static, embassy_stm32::peripherals::IWDG>,
}

impl IwdgWatchdog {
    pub fn new(wdg: IndependentWatchdog<'static, embassy_stm32::peripherals::IWDG>) -> Self {
        Self { wdg }
    }

    /// Starts the countdown. Cannot be stopped until the next reset.
    pub fn unleash(&mut self) {
        self.wdg.unleash();
    }
}

impl Watchdog for IwdgWatchdog {
    fn feed(&mut self) {
        self.wdg.pet();
    }
}

/// Periodic control loop.
///
/// Runs one supervisor tick every `SUPERVISOR_PERIOD_MS`. Skipped ticks are
/// logged and counted by the core; the loop itself never exits.
///
/// # Example
///
/// ```no_run
/// spawner.spawn(supervisor_task(sampler, lines, watchdog, config, &SHARED)).unwrap();
/// ```
#[embassy_executor::task]
pub async fn supervisor_task(
    mut sampler: AdcSampler,
    mut lines: GpioPowerLines,
    mut watchdog: IwdgWatchdog,
    config: &'static UpsConfig,
    shared: &'static ControlState,
) {
    let mut supervisor = Supervisor::new(config);
    supervisor.start(&mut lines, shared);

    watchdog.unleash();
    let mut ticker = Ticker::every(Duration::from_millis(SUPERVISOR_PERIOD_MS));
    loop {
        // Errors are already logged and counted; the next tick retries.
        let _ = supervisor
            .tick(&mut sampler, &mut lines, &mut watchdog, shared)
            .await;
        ticker.next().await;
    }
}
