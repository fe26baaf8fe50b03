//! Pin mappings and peripheral initialization for the UPS board.
//!
//! # Pin Assignments
//!
//! ## Analog inputs (ADC1)
//! - **PA0**: lower cell of the 2S pack, to ground (divider 1.384)
//! - **PA1**: 12V bus (divider 3.925)
//! - **PA2**: full pack (divider 2.664)
//!
//! ## Power paths (push-pull, active high)
//! - **PA8**: BAT_EN - connects the pack to the charger node
//! - **PA4**: CHRG_EN - full-current charge path
//! - **PA7**: TRICKLE_EN - maintenance charge path
//!
//! ## Host link
//! - **PA11**: USB_DM
//! - **PA12**: USB_DP
//!
//! ## Status
//! - **PB1**: LED
//!
//! ## Debug (SWD)
//! - **PA13**: SWDIO
//! - **PA14**: SWCLK

use core::ptr;

use embassy_stm32::{
    adc::{self, Adc, AdcChannel, SampleTime},
    bind_interrupts,
    gpio::{Level, Output, Speed},
    peripherals::{ADC1, USB},
    usb,
    wdg::IndependentWatchdog,
};
use ups12v_core::config::WATCHDOG_TIMEOUT_MS;

use crate::adc::AdcSampler;
use crate::power::{GpioPowerLines, IwdgWatchdog};

bind_interrupts!(pub struct Irqs {
    ADC1 => adc::InterruptHandler<ADC1>;
    USB => usb::InterruptHandler<USB>;
});

/// Address of `VREFINT_CAL` in system memory (DS10152, table 19).
const VREFINT_CAL_ADDR: usize = 0x1FFF_F7BA;

/// Reads the factory reference calibration word.
pub fn read_vrefint_cal() -> u16 {
    // SAFETY: fixed, always-mapped, read-only system memory location.
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR as *const u16) }
}

/// Board-level resources, split up and handed to the tasks in `main`.
pub struct Peripherals {
    /// Power path outputs driven by the supervisor
    pub lines: GpioPowerLines,
    /// Three-channel sampler including the internal reference
    pub sampler: AdcSampler,
    /// Independent watchdog, not started yet
    pub watchdog: IwdgWatchdog,
    /// Status LED
    pub led: Output<'static>,
    /// USB full-speed device driver for the shell
    pub usb: usb::Driver<'static, USB>,
}

impl Peripherals {
    /// Consumes the embassy-stm32 singleton.
    ///
    /// All three power paths start low, the level `Idle` expects.
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        let mut adc = Adc::new(p.ADC1, Irqs);
        adc.set_sample_time(SampleTime::CYCLES239_5);
        let reference = adc.enable_vref();

        Self {
            lines: GpioPowerLines::new(
                Output::new(p.PA8, Level::Low, Speed::Low),
                Output::new(p.PA7, Level::Low, Speed::Low),
                Output::new(p.PA4, Level::Low, Speed::Low),
            ),
            sampler: AdcSampler::new(
                adc,
                [
                    p.PA0.degrade_adc(),
                    p.PA1.degrade_adc(),
                    p.PA2.degrade_adc(),
                ],
                reference,
            ),
            watchdog: IwdgWatchdog::new(IndependentWatchdog::new(
                p.IWDG,
                WATCHDOG_TIMEOUT_MS * 1000,
            )),
            led: Output::new(p.PB1, Level::Low, Speed::Low),
            usb: usb::Driver::new(p.USB, Irqs, p.PA12, p.PA11),
        }
    }
}
