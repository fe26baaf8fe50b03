//! Operator shell over USB CDC-ACM.
//!
//! Bytes from the host are echoed, assembled into lines and handed to the
//! command layer of the control core. `poll` streams the status line once
//! per second until the host sends Ctrl-C.

use core::fmt::Write;

use embassy_futures::select::{Either, select};
use embassy_stm32::{peripherals::USB, usb};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Ticker};
use embassy_usb::{
    Builder, UsbDevice,
    class::cdc_acm::{CdcAcmClass, State},
    driver::EndpointError,
};
use heapless::String;
use static_cell::StaticCell;
use ups12v_core::{
    ControlState, UpsConfig,
    command::{
        Action, Command, CommandContext, LineBuffer, LineEvent, contains_interrupt, execute,
        write_error,
    },
    config::POLL_PERIOD_MS,
};

pub type UsbDriver = usb::Driver<'static, USB>;

const MAX_PACKET_SIZE: u16 = 64;

/// Longest single response (help and usage texts included).
const RESPONSE_CAPACITY: usize = 256;

const FIRMWARE: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

const PROMPT: &[u8] = b"ups> ";

/// Host connection changes, consumed by the status LED.
pub static HOST_CONNECTED: Signal<CriticalSectionRawMutex, bool> = Signal::new();

static CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static MSOS_DESC: StaticCell<[u8; 128]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

/// Builds the USB device with a single CDC-ACM interface.
pub fn build(
    driver: UsbDriver,
) -> (
    UsbDevice<'static, UsbDriver>,
    CdcAcmClass<'static, UsbDriver>,
) {
    let mut config = embassy_usb::Config::new(0x1209, 0x0001);
    config.manufacturer = Some("ups12v");
    config.product = Some("12V UPS controller");
    config.serial_number = Some("0001");
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        config,
        CONFIG_DESC.init([0; 256]),
        BOS_DESC.init([0; 256]),
        MSOS_DESC.init([0; 128]),
        CONTROL_BUF.init([0; 64]),
    );
    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), MAX_PACKET_SIZE);
    (builder.build(), class)
}

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) {
    device.run().await;
}

#[embassy_executor::task]
pub async fn shell_task(
    mut class: CdcAcmClass<'static, UsbDriver>,
    config: &'static UpsConfig,
    shared: &'static ControlState,
) {
    let ctx = CommandContext {
        shared,
        policy: &config.thresholds,
        firmware: FIRMWARE,
    };
    loop {
        class.wait_connection().await;
        defmt::info!("shell connected");
        HOST_CONNECTED.signal(true);

        let _ = session(&mut class, &ctx).await;

        defmt::info!("shell disconnected");
        HOST_CONNECTED.signal(false);
    }
}

struct Disconnected;

impl From<EndpointError> for Disconnected {
    fn from(err: EndpointError) -> Self {
        if let EndpointError::BufferOverflow = err {
            defmt::warn!("USB CDC buffer overflow");
        }
        Disconnected
    }
}

async fn session(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    ctx: &CommandContext<'_>,
) -> Result<(), Disconnected> {
    let mut line = LineBuffer::new();
    let mut packet = [0u8; MAX_PACKET_SIZE as usize];

    write_all(class, b"\r\n").await?;
    write_all(class, FIRMWARE.as_bytes()).await?;
    write_all(class, b"\r\nType 'help' and press Enter.\r\n").await?;
    write_all(class, PROMPT).await?;

    loop {
        let n = class.read_packet(&mut packet).await?;
        for &byte in &packet[..n] {
            echo(class, byte).await?;
            let event = match line.push(byte) {
                Some(event) => event,
                None => continue,
            };
            match event {
                LineEvent::Line(text) => run_line(class, &text, ctx).await?,
                LineEvent::Overflow => write_all(class, b"Line too long\r\n").await?,
                LineEvent::Interrupt => write_all(class, b"^C\r\n").await?,
            }
            write_all(class, PROMPT).await?;
        }
    }
}

async fn echo(class: &mut CdcAcmClass<'static, UsbDriver>, byte: u8) -> Result<(), Disconnected> {
    match byte {
        b'\r' | b'\n' => write_all(class, b"\r\n").await,
        0x08 | 0x7f => write_all(class, b"\x08 \x08").await,
        0x20..=0x7e => write_all(class, &[byte]).await,
        _ => Ok(()),
    }
}

async fn run_line(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    text: &str,
    ctx: &CommandContext<'_>,
) -> Result<(), Disconnected> {
    let mut out: String<RESPONSE_CAPACITY> = String::new();
    let result = match Command::parse(text) {
        Ok(Some(command)) => {
            defmt::debug!("command {}", command);
            execute(command, ctx, &mut out)
        }
        Ok(None) => Ok(Action::Done),
        Err(err) => Err(err),
    };

    match result {
        Ok(Action::Done) => write_all(class, out.as_bytes()).await,
        Ok(Action::StartPoll) => poll(class, ctx.shared).await,
        Err(err) => {
            out.clear();
            // Usage texts fit; a truncated message is still worth sending.
            let _ = write_error(&err, &mut out);
            write_all(class, out.as_bytes()).await
        }
    }
}

async fn poll(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    shared: &ControlState,
) -> Result<(), Disconnected> {
    let mut packet = [0u8; MAX_PACKET_SIZE as usize];
    let mut ticker = Ticker::every(Duration::from_millis(POLL_PERIOD_MS));
    loop {
        let mut report: String<64> = String::new();
        let _ = write!(report, "{}\r\n", shared.snapshot());
        write_all(class, report.as_bytes()).await?;

        // Other input is swallowed without moving the next report forward.
        loop {
            let event = select(ticker.next(), class.read_packet(&mut packet)).await;
            match event {
                Either::First(()) => break,
                Either::Second(read) => {
                    if contains_interrupt(&packet[..read?]) {
                        return write_all(class, b"^C\r\n").await;
                    }
                }
            }
        }
    }
}

/// Writes `data` in packet-sized chunks, closing with a zero-length packet
/// when the last chunk is full.
async fn write_all(
    class: &mut CdcAcmClass<'static, UsbDriver>,
    data: &[u8],
) -> Result<(), Disconnected> {
    let size = class.max_packet_size() as usize;
    for chunk in data.chunks(size) {
        class.write_packet(chunk).await?;
    }
    if !data.is_empty() && data.len() % size == 0 {
        class.write_packet(&[]).await?;
    }
    Ok(())
}
