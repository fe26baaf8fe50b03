//! Firmware for a battery-backed 12V supply (small UPS).
//!
//! # Overview
//!
//! The board sits between a 12V adapter and the load, with a 2S lithium pack
//! behind an ideal diode. The firmware:
//! - Samples the bus, the pack and its lower cell against the internal reference
//! - Switches the pack between idle, trickle charge, full charge and discharge
//! - Exposes a small command shell over USB CDC-ACM
//! - Resets through the independent watchdog if the control loop stalls
//!
//! # Hardware
//!
//! - **MCU**: STM32F042K6 (Cortex-M0, crystal-less USB)
//! - **Pack**: 2S lithium, balance tap on the lower cell
//! - **Switches**: battery enable, trickle enable, charge enable
//!
//! # Tasks
//!
//! | Task              | Period           | Role                                |
//! |-------------------|------------------|-------------------------------------|
//! | `supervisor_task` | 200 ms           | acquire, calibrate, smooth, decide  |
//! | `shell_task`      | on input         | commands from the USB host          |
//! | `usb_task`        | on bus events    | USB device stack                    |
//! | `display_task`    | 2 s              | logs the status line                |
//! | `main`            | 100 ms / 1 s     | status LED                          |
//!
//! All control logic lives in `ups12v-core`; this crate only binds it to the
//! hardware.
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings and peripheral initialization
//! - [`adc`] - ADC sampler feeding the control core
//! - [`power`] - Power path outputs, watchdog and the supervisor task
//! - [`shell`] - USB CDC-ACM command shell
//! - [`display`] - Periodic status output

#![no_std]
#![no_main]

mod adc;
mod display;
mod hardware;
mod power;
mod shell;

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_stm32::{
    Config,
    rcc::{Hsi48Config, Sysclk, mux},
};
use embassy_time::Timer;
use static_cell::StaticCell;
use ups12v_core::{ControlState, UpsConfig};
use {defmt_rtt as _, panic_probe as _};

use display::display_task;
use hardware::Peripherals;
use power::supervisor_task;
use shell::{HOST_CONNECTED, shell_task, usb_task};

/// LED toggle period while a shell host is attached.
const LED_CONNECTED_MS: u64 = 100;

/// LED toggle period otherwise.
const LED_IDLE_MS: u64 = 1000;

/// Voltages, mode, cutoffs and tick counters shared by all tasks.
static SHARED: ControlState = ControlState::from_config(&UpsConfig::DEFAULT);

/// Board configuration, completed at boot with the device calibration word.
static CONFIG: StaticCell<UpsConfig> = StaticCell::new();

/// Creates a 48 MHz clock configuration for STM32F042.
///
/// # Clock Settings
///
/// - **HSI48**: system clock, trimmed by CRS from USB start-of-frame packets
/// - **USB**: clocked from HSI48, no crystal needed
/// - **ADC**: runs from its dedicated HSI14 (reset default)
fn create_usb_clock_config() -> embassy_stm32::rcc::Config {
    let mut rcc = embassy_stm32::rcc::Config::default();
    rcc.hsi48 = Some(Hsi48Config {
        sync_from_usb: true,
    });
    rcc.sys = Sysclk::HSI48;
    rcc.mux.usbsw = mux::Usbsw::HSI48;
    rcc
}

/// Main entry point.
///
/// # Initialization Sequence
///
/// 1. Configure clocks (HSI48, USB-synchronized)
/// 2. Read the factory reference calibration word
/// 3. Initialize GPIO, ADC, USB and watchdog (all power paths low)
/// 4. Spawn supervisor, USB, shell and display tasks
/// 5. Blink the status LED forever
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_usb_clock_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("12V UPS firmware starting...");

    let vrefint_cal = hardware::read_vrefint_cal();
    defmt::info!("VREFINT_CAL = {}", vrefint_cal);
    let ups_config: &'static UpsConfig = CONFIG.init(UpsConfig::with_vrefint_cal(vrefint_cal));

    #[cfg(feature = "debug-mode")]
    defmt::info!("Initializing peripherals...");

    let peripherals = Peripherals::new(p);
    let (usb, class) = shell::build(peripherals.usb);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Spawning tasks...");

    spawner
        .spawn(supervisor_task(
            peripherals.sampler,
            peripherals.lines,
            peripherals.watchdog,
            ups_config,
            &SHARED,
        ))
        .unwrap();
    spawner.spawn(usb_task(usb)).unwrap();
    spawner.spawn(shell_task(class, ups_config, &SHARED)).unwrap();
    spawner.spawn(display_task(&SHARED)).unwrap();

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering LED loop...");

    let mut led = peripherals.led;
    let mut connected = false;
    loop {
        let period = if connected { LED_CONNECTED_MS } else { LED_IDLE_MS };
        match select(Timer::after_millis(period), HOST_CONNECTED.wait()).await {
            Either::First(()) => led.toggle(),
            Either::Second(now) => connected = now,
        }
    }
}
