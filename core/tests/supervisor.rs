use embassy_futures::block_on;
use ups12v_core::analog::{AcquireError, Channel, ChannelValues, RawFrame, Sampler};
use ups12v_core::calibration::{CalibrationError, FACTORY_CAL_MV, FULL_SCALE};
use ups12v_core::config::{ADC_SUBSAMPLES, CHANNEL_GAINS, UpsConfig};
use ups12v_core::control_state::{ControlState, Cutoffs};
use ups12v_core::power::{PowerLine, PowerLines, PowerState, Transition};
use ups12v_core::supervisor::{Supervisor, TickError, Watchdog};
use ups12v_core::thresholds::{ThresholdError, ThresholdKind, ThresholdRequest};

/// Returns whatever the test last put in `next`.
struct ScriptedSampler {
    next: Result<RawFrame, AcquireError>,
    calls: usize,
}

impl Sampler for ScriptedSampler {
    async fn acquire(&mut self) -> Result<RawFrame, AcquireError> {
        self.calls += 1;
        self.next
    }
}

#[derive(Default)]
struct RecordingLines {
    battery: bool,
    trickle: bool,
    charge: bool,
    writes: Vec<(PowerLine, bool)>,
}

impl RecordingLines {
    fn set(&mut self, line: PowerLine, level: bool) {
        match line {
            PowerLine::Battery => self.battery = level,
            PowerLine::Trickle => self.trickle = level,
            PowerLine::Charge => self.charge = level,
        }
        self.writes.push((line, level));
    }
}

impl PowerLines for RecordingLines {
    fn enable(&mut self, line: PowerLine) {
        self.set(line, true);
    }

    fn disable(&mut self, line: PowerLine) {
        self.set(line, false);
    }
}

#[derive(Default)]
struct CountingWatchdog {
    feeds: usize,
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}

/// ADC sums that calibrate back to exactly the given millivolts with the
/// default configuration (supply at the factory 3.3 V).
fn frame(cell_mv: u16, bus_mv: u16, battery_mv: u16) -> RawFrame {
    let config = UpsConfig::DEFAULT;
    let reference = config.calibration.vrefint_cal as u32 * ADC_SUBSAMPLES;
    let mut sums = ChannelValues::splat(0u32);
    for (channel, mv) in Channel::ALL.into_iter().zip([cell_mv, bus_mv, battery_mv]) {
        let gain = CHANNEL_GAINS[channel];
        let numerator =
            mv as u64 * FULL_SCALE as u64 * ADC_SUBSAMPLES as u64 * gain.denominator as u64;
        let denominator = FACTORY_CAL_MV as u64 * gain.numerator as u64;
        sums[channel] = numerator.div_ceil(denominator) as u32;
    }
    RawFrame { sums, reference }
}

struct Rig {
    supervisor: Supervisor,
    sampler: ScriptedSampler,
    lines: RecordingLines,
    watchdog: CountingWatchdog,
    shared: ControlState,
}

impl Rig {
    fn new() -> Self {
        let config = UpsConfig::DEFAULT;
        let shared = ControlState::from_config(&config);
        let supervisor = Supervisor::new(&config);
        let mut lines = RecordingLines::default();
        supervisor.start(&mut lines, &shared);
        lines.writes.clear();
        Self {
            supervisor,
            sampler: ScriptedSampler {
                next: Ok(frame(4100, 12_000, 8200)),
                calls: 0,
            },
            lines,
            watchdog: CountingWatchdog::default(),
            shared,
        }
    }

    fn feed(&mut self, frame: Result<RawFrame, AcquireError>) -> Result<Option<Transition>, TickError> {
        self.sampler.next = frame;
        block_on(self.supervisor.tick(
            &mut self.sampler,
            &mut self.lines,
            &mut self.watchdog,
            &self.shared,
        ))
    }

    /// Feeds the same frame until a transition happens or `limit` ticks pass.
    fn feed_until_transition(&mut self, frame: RawFrame, limit: usize) -> Option<Transition> {
        for _ in 0..limit {
            if let Some(t) = self.feed(Ok(frame)).expect("tick failed") {
                return Some(t);
            }
        }
        None
    }
}

#[test]
fn frame_helper_is_exact() {
    let calibrator = ups12v_core::calibration::Calibrator::new(UpsConfig::DEFAULT.calibration);
    assert_eq!(
        calibrator.calibrate(&frame(4100, 11_500, 8250)),
        Ok(ChannelValues::new([4100, 11_500, 8250]))
    );
}

#[test]
fn start_drives_all_lines_low() {
    let config = UpsConfig::DEFAULT;
    let shared = ControlState::new(config.smoothing_seeds, Cutoffs {
        charge_mv: 8200,
        idle_discharge_mv: 7500,
    });
    let supervisor = Supervisor::new(&config);
    let mut lines = RecordingLines::default();
    lines.battery = true;
    lines.charge = true;
    supervisor.start(&mut lines, &shared);
    assert!(!lines.battery && !lines.trickle && !lines.charge);
    assert_eq!(shared.power_state(), PowerState::Idle);
}

#[test]
fn bus_loss_from_idle_discharges_without_line_writes() {
    let mut rig = Rig::new();
    let t = rig.feed_until_transition(frame(4100, 11_500, 8200), 8);
    assert_eq!(
        t,
        Some(Transition {
            from: PowerState::Idle,
            to: PowerState::Discharge
        })
    );
    assert!(rig.lines.writes.is_empty());
    assert_eq!(rig.shared.power_state(), PowerState::Discharge);

    // Stays put once the bus has settled low.
    for _ in 0..16 {
        assert_eq!(rig.feed(Ok(frame(4100, 11_500, 8200))), Ok(None));
    }
    assert_eq!(rig.shared.voltage(Channel::Bus), 11_500);
}

#[test]
fn charge_cutoff_hands_over_to_trickle() {
    let mut rig = Rig::new();
    // Deeply discharged pack on mains: Idle -> Trickle -> Charge.
    rig.feed_until_transition(frame(3500, 12_000, 7000), 8);
    rig.feed_until_transition(frame(3500, 12_000, 7000), 8);
    assert_eq!(rig.supervisor.state(), PowerState::Charge);
    assert!(rig.lines.battery && rig.lines.charge && !rig.lines.trickle);

    let t = rig.feed_until_transition(frame(4125, 12_000, 8250), 16);
    assert_eq!(
        t,
        Some(Transition {
            from: PowerState::Charge,
            to: PowerState::Trickle
        })
    );
    assert!(rig.shared.voltage(Channel::Battery) > 8200);
    assert!(rig.lines.battery && rig.lines.trickle && !rig.lines.charge);
    assert_eq!(rig.shared.power_state(), PowerState::Trickle);
}

#[test]
fn rejected_threshold_changes_nothing() {
    let mut rig = Rig::new();
    let policy = UpsConfig::DEFAULT.thresholds;
    assert_eq!(
        rig.shared.set_threshold(
            ThresholdKind::IdleDischarge,
            ThresholdRequest::Percent(45),
            &policy
        ),
        Err(ThresholdError::PercentOutOfRange)
    );
    assert_eq!(
        rig.shared.cutoffs(),
        Cutoffs {
            charge_mv: 8200,
            idle_discharge_mv: 7500
        }
    );
    // The old limits still drive the controller.
    assert_eq!(
        rig.feed_until_transition(frame(3800, 12_000, 7600), 16),
        Some(Transition {
            from: PowerState::Idle,
            to: PowerState::Trickle
        })
    );
}

#[test]
fn accepted_threshold_applies_on_next_tick() {
    let mut rig = Rig::new();
    let policy = UpsConfig::DEFAULT.thresholds;
    assert_eq!(
        rig.feed_until_transition(frame(3950, 12_000, 7900), 8),
        Some(Transition {
            from: PowerState::Idle,
            to: PowerState::Trickle
        })
    );
    assert_eq!(rig.supervisor.state(), PowerState::Trickle);

    // Lowering the charge cutoff below the pack ends the trickle charge.
    rig.shared
        .set_threshold(ThresholdKind::Charge, ThresholdRequest::Percent(70), &policy)
        .unwrap();
    assert_eq!(
        rig.feed(Ok(frame(3950, 12_000, 7900))),
        Ok(Some(Transition {
            from: PowerState::Trickle,
            to: PowerState::Idle
        }))
    );
    assert!(!rig.lines.battery && !rig.lines.trickle && !rig.lines.charge);
}

#[test]
fn acquisition_failure_skips_but_feeds_watchdog() {
    let mut rig = Rig::new();
    rig.feed_until_transition(frame(4100, 11_000, 8200), 8);
    assert_eq!(rig.supervisor.state(), PowerState::Discharge);
    let voltages = rig.shared.voltages();
    let ticks = rig.shared.ticks();
    let feeds = rig.watchdog.feeds;

    // Mains returns, but the converter times out: nothing may change.
    for _ in 0..5 {
        assert_eq!(
            rig.feed(Err(AcquireError::Timeout)),
            Err(TickError::Acquisition(AcquireError::Timeout))
        );
    }
    assert_eq!(rig.supervisor.state(), PowerState::Discharge);
    assert_eq!(rig.shared.power_state(), PowerState::Discharge);
    assert_eq!(rig.shared.voltages(), voltages);
    assert_eq!(rig.shared.ticks(), ticks);
    assert_eq!(rig.shared.skipped(), 5);
    assert_eq!(rig.watchdog.feeds, feeds + 5);
    assert!(rig.lines.writes.is_empty());
}

#[test]
fn zero_reference_is_skipped_like_a_failed_acquisition() {
    let mut rig = Rig::new();
    let mut bad = frame(4100, 0, 0);
    bad.reference = 0;
    for _ in 0..8 {
        assert_eq!(
            rig.feed(Ok(bad)),
            Err(TickError::Calibration(CalibrationError::ReferenceFault))
        );
    }
    // A zeroed bus would have forced Discharge had it reached the smoother.
    assert_eq!(rig.supervisor.state(), PowerState::Idle);
    assert_eq!(rig.shared.voltage(Channel::Bus), 12_000);
    assert_eq!(rig.watchdog.feeds, 8);
    assert_eq!(rig.shared.skipped(), 8);
    assert_eq!(rig.sampler.calls, 8);
}

#[test]
fn weak_reference_glitch_during_discharge_is_skipped() {
    let mut rig = Rig::new();
    let on_battery = frame(4100, 11_000, 8200);
    rig.feed_until_transition(on_battery, 10);
    assert_eq!(rig.supervisor.state(), PowerState::Discharge);
    let voltages = rig.shared.voltages();

    // Reference reads one LSB per subsample: the derived rail would be ~5 V and
    // every channel would saturate, bus included.
    let mut glitch = on_battery;
    glitch.reference = ADC_SUBSAMPLES;
    assert_eq!(
        rig.feed(Ok(glitch)),
        Err(TickError::Calibration(CalibrationError::ReferenceFault))
    );
    assert_eq!(rig.supervisor.state(), PowerState::Discharge);
    assert_eq!(rig.shared.power_state(), PowerState::Discharge);
    assert_eq!(rig.shared.voltages(), voltages);
    assert_eq!(rig.shared.skipped(), 1);
    assert!(rig.lines.writes.is_empty());

    // Next good frame carries on as if nothing happened.
    assert_eq!(rig.feed(Ok(on_battery)), Ok(None));
}

#[test]
fn published_voltages_converge_over_window() {
    let mut rig = Rig::new();
    let target = frame(4000, 12_400, 8100);
    let mut previous = rig.shared.voltage(Channel::Bus);
    for _ in 0..8 {
        rig.feed(Ok(target)).unwrap();
        let bus = rig.shared.voltage(Channel::Bus);
        assert!(bus >= previous);
        previous = bus;
    }
    assert_eq!(rig.shared.voltages(), ChannelValues::new([4000, 12_400, 8100]));
    assert_eq!(rig.shared.ticks(), 8);
    assert_eq!(rig.watchdog.feeds, 8);
}
