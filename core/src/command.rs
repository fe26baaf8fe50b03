//! Operator shell language.
//!
//! Lines are whitespace separated: a command word followed by at most one
//! argument. The transport (USB CDC on the board) feeds raw bytes to a
//! [`LineBuffer`], hands complete lines to [`Command::parse`] and writes
//! whatever [`execute`] renders back to the host.
//!
//! ```text
//! poll                      report status every second until Ctrl-C
//! limit-charge 85           stop charging at 85% of the charge curve
//! limit-discharge 3750mV    recharge an idle pack below 3750 mV per cell
//! limits                    print both cutoffs
//! info                      firmware version and tick counters
//! help                      list commands
//! ```

use core::fmt::{self, Write};

use heapless::String;

use crate::config::CELLS_IN_SERIES;
use crate::control_state::ControlState;
use crate::thresholds::{ThresholdError, ThresholdKind, ThresholdPolicy, ThresholdRequest};

/// Longest accepted input line.
pub const LINE_CAPACITY: usize = 64;

/// End-of-text, sent by terminals for Ctrl-C.
pub const CTRL_C: u8 = 0x03;

/// Whether a chunk of host input carries Ctrl-C anywhere in it.
///
/// Used while `poll` streams; every other byte in the chunk is discarded.
pub fn contains_interrupt(bytes: &[u8]) -> bool {
    bytes.contains(&CTRL_C)
}

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// What a byte completed, if anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete, non-blank line without its terminator
    Line(String<LINE_CAPACITY>),
    /// Ctrl-C; the pending line was discarded
    Interrupt,
    /// The line outgrew the buffer and was dropped
    Overflow,
}

/// Assembles printable ASCII into lines.
///
/// CR or LF terminates a line; an empty line yields nothing so CRLF hosts do
/// not produce a second, blank command. Other control characters except
/// backspace and Ctrl-C are ignored.
#[derive(Default)]
pub struct LineBuffer {
    line: String<LINE_CAPACITY>,
    overflowed: bool,
}

impl LineBuffer {
    /// Empty buffer.
    pub const fn new() -> Self {
        Self {
            line: String::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte from the host.
    ///
    /// # Returns
    ///
    /// The event the byte completed, or `None` while a line is still being
    /// typed.
    pub fn push(&mut self, byte: u8) -> Option<LineEvent> {
        match byte {
            CTRL_C => {
                self.clear();
                Some(LineEvent::Interrupt)
            }
            b'\r' | b'\n' => {
                let overflowed = self.overflowed;
                let line = core::mem::take(&mut self.line);
                self.overflowed = false;
                if overflowed {
                    Some(LineEvent::Overflow)
                } else if line.trim().is_empty() {
                    None
                } else {
                    Some(LineEvent::Line(line))
                }
            }
            BACKSPACE | DELETE => {
                self.line.pop();
                None
            }
            0x20..=0x7e => {
                if self.line.push(byte as char).is_err() {
                    self.overflowed = true;
                }
                None
            }
            _ => None,
        }
    }

    /// Drops the pending line and any overflow marker.
    pub fn clear(&mut self) {
        self.line.clear();
        self.overflowed = false;
    }
}

/// A parsed shell command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `poll`: stream the status line until Ctrl-C
    Poll,
    /// `limit-charge <value>`
    LimitCharge(ThresholdRequest),
    /// `limit-discharge <value>`
    LimitDischarge(ThresholdRequest),
    /// `limits`: print both cutoffs
    Limits,
    Info,
    Help,
}

/// Why a line produced no response of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    UnknownCommand,
    /// The command needs an argument and got none
    MissingArgument(&'static str),
    /// The argument is not a number, or extra arguments were given
    InvalidArgument(&'static str),
    Threshold(ThresholdKind, ThresholdError),
    /// The response did not fit the output buffer
    OutputOverflow,
}

impl CommandError {
    /// Usage text to print after the error, if the command has one.
    pub fn usage(&self) -> Option<&'static str> {
        match self {
            CommandError::MissingArgument(usage) | CommandError::InvalidArgument(usage) => {
                Some(usage)
            }
            CommandError::Threshold(ThresholdKind::Charge, _) => Some(LIMIT_CHARGE_USAGE),
            CommandError::Threshold(ThresholdKind::IdleDischarge, _) => {
                Some(LIMIT_DISCHARGE_USAGE)
            }
            CommandError::UnknownCommand => Some(HELP),
            CommandError::OutputOverflow => None,
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand => f.write_str("Unknown command"),
            CommandError::MissingArgument(_) => f.write_str("Missing argument"),
            CommandError::InvalidArgument(_) => f.write_str("Invalid argument"),
            CommandError::Threshold(_, err) => write!(f, "{err}"),
            CommandError::OutputOverflow => f.write_str("Response too long"),
        }
    }
}

impl From<fmt::Error> for CommandError {
    fn from(_: fmt::Error) -> Self {
        CommandError::OutputOverflow
    }
}

const POLL_USAGE: &str = "Usage: poll\r\n  Continuously reports bus, battery and balance voltages in mV,\r\n  battery level % and the current state\r\n  Press CTRL-C to exit";
const LIMIT_CHARGE_USAGE: &str = "Usage: limit-charge <50-100 | 3800-4200mV>\r\n  Set the level at which charging stops, in percent or per-cell mV";
const LIMIT_DISCHARGE_USAGE: &str = "Usage: limit-discharge <50-100 | 3800-4200mV>\r\n  Set the idle level below which charging restarts, in percent or per-cell mV";
const HELP: &str = "Commands: poll limit-charge limit-discharge limits info help";

impl Command {
    /// Parses one line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let argument = words.next();
        let extra = words.next().is_some();

        let command = match name {
            "poll" if argument.is_none() => Command::Poll,
            "poll" => return Err(CommandError::InvalidArgument(POLL_USAGE)),
            "limit-charge" => {
                Command::LimitCharge(parse_threshold(argument, extra, LIMIT_CHARGE_USAGE)?)
            }
            "limit-discharge" => {
                Command::LimitDischarge(parse_threshold(argument, extra, LIMIT_DISCHARGE_USAGE)?)
            }
            "limits" => Command::Limits,
            "info" => Command::Info,
            "help" | "?" => Command::Help,
            _ => return Err(CommandError::UnknownCommand),
        };
        Ok(Some(command))
    }
}

fn parse_threshold(
    argument: Option<&str>,
    extra: bool,
    usage: &'static str,
) -> Result<ThresholdRequest, CommandError> {
    let argument = argument.ok_or(CommandError::MissingArgument(usage))?;
    if extra {
        return Err(CommandError::InvalidArgument(usage));
    }

    let millivolts = argument
        .strip_suffix("mV")
        .or_else(|| argument.strip_suffix("mv"));
    let (digits, percent) = match millivolts {
        Some(digits) => (digits, false),
        None => (argument.strip_suffix('%').unwrap_or(argument), true),
    };
    let value: u16 = digits
        .parse()
        .map_err(|_| CommandError::InvalidArgument(usage))?;

    Ok(if percent {
        ThresholdRequest::Percent(value)
    } else {
        ThresholdRequest::CellMillivolts(value)
    })
}

/// Follow-up the transport has to perform after a command ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Done,
    /// Report status periodically until interrupted
    StartPoll,
}

/// What `execute` needs besides the command.
pub struct CommandContext<'a> {
    pub shared: &'a ControlState,
    /// Bounds applied to `limit-*` arguments
    pub policy: &'a ThresholdPolicy,
    /// Name and version printed by `info`
    pub firmware: &'a str,
}

/// Runs a command and renders its response, CRLF terminated.
pub fn execute(
    command: Command,
    ctx: &CommandContext<'_>,
    out: &mut impl Write,
) -> Result<Action, CommandError> {
    match command {
        Command::Poll => return Ok(Action::StartPoll),
        Command::LimitCharge(request) => set_cutoff(ThresholdKind::Charge, request, ctx, out)?,
        Command::LimitDischarge(request) => {
            set_cutoff(ThresholdKind::IdleDischarge, request, ctx, out)?
        }
        Command::Limits => {
            let cutoffs = ctx.shared.cutoffs();
            write!(
                out,
                "Charge will be stopped reaching {}mV and started from {}mV\r\n",
                cutoffs.charge_mv, cutoffs.idle_discharge_mv
            )?;
        }
        Command::Info => {
            write!(
                out,
                "{}\r\nticks: {}, skipped: {}\r\n",
                ctx.firmware,
                ctx.shared.ticks(),
                ctx.shared.skipped()
            )?;
        }
        Command::Help => write!(out, "{HELP}\r\n")?,
    }
    Ok(Action::Done)
}

fn set_cutoff(
    kind: ThresholdKind,
    request: ThresholdRequest,
    ctx: &CommandContext<'_>,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let mv = ctx
        .shared
        .set_threshold(kind, request, ctx.policy)
        .map_err(|err| CommandError::Threshold(kind, err))?;
    write!(
        out,
        "Per element: {}mV, Battery: {}mV\r\n",
        mv / CELLS_IN_SERIES,
        mv
    )?;
    Ok(())
}

/// Renders an error followed by the relevant usage text.
pub fn write_error(err: &CommandError, out: &mut impl Write) -> fmt::Result {
    write!(out, "{err}\r\n")?;
    if let Some(usage) = err.usage() {
        write!(out, "{usage}\r\n")?;
    }
    Ok(())
}
