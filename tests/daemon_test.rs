//! End-to-end engine scenarios against simulated hardware (test-mode
//! bypass), a pinned clock, and channel-backed scheduler links.

use chrono::{DateTime, TimeZone, Utc};
use mountd::ipc::{
    ChannelCommandSource, ChannelStatusSink, IncomingCommand, MountStatus, StatusSink,
};
use mountd::mount_control::calibration::{CalRecord, CalibrationFeed, FocusFeed, FocusSample};
use mountd::mount_control::comm::NullPort;
use mountd::pointing::{FocusModel, FocusTerm};
use mountd::util::{
    AlarmType, CmdFlags, FeedError, IpcError, MoveMode, NullMailer, SignalFlags, StateBits,
    TestMode,
};
use mountd::{astro_math, coords, Clock, EngineIo, ManualClock, MountConfig, MountEngine};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

fn t0() -> DateTime<Utc> {
    Utc.ymd(2024, 1, 1).and_hms(0, 0, 0)
}

fn bench_config() -> MountConfig {
    let mut cfg = MountConfig::default();
    cfg.testmode = TestMode::NO_MOUNT | TestMode::NO_FOCUS;
    cfg
}

struct Harness {
    engine: MountEngine,
    clock: ManualClock,
    commands: mpsc::Sender<IncomingCommand>,
    statuses: mpsc::Receiver<MountStatus>,
    signals: SignalFlags,
}

fn harness(cfg: MountConfig) -> Harness {
    harness_with_feeds(cfg, None, None)
}

fn harness_with_feeds(
    cfg: MountConfig,
    cal_feed: Option<Box<dyn CalibrationFeed>>,
    focus_feed: Option<Box<dyn FocusFeed>>,
) -> Harness {
    let clock = ManualClock::new(t0());
    let (commands, source) = ChannelCommandSource::new();
    let (sink, statuses) = ChannelStatusSink::new();
    let signals = SignalFlags::new();
    let io = EngineIo {
        mount_port: Box::new(NullPort),
        focus_port: Box::new(NullPort),
        clock: Box::new(clock.clone()),
        source: Box::new(source),
        sink: Box::new(sink),
        mailer: Box::new(NullMailer),
        cal_feed,
        focus_feed,
        signals: signals.clone(),
        config_path: None,
    };
    Harness {
        engine: MountEngine::new(cfg, io),
        clock,
        commands,
        statuses,
        signals,
    }
}

fn command(move_mode: MoveMode) -> IncomingCommand {
    IncomingCommand {
        move_mode,
        ra: 0.0,
        dec: 0.0,
        foc: f64::NAN,
        slew_spd: 50,
        dectrack: 0.0,
        temp: 10.0,
        flags: CmdFlags::empty(),
    }
}

fn ticks(h: &mut Harness, n: usize) {
    for _ in 0..n {
        h.engine.tick().unwrap();
    }
}

#[test]
fn cold_start_initializes_and_goes_idle() {
    let mut h = harness(bench_config());
    h.engine.start().unwrap();
    assert!(h.engine.status().state.contains(StateBits::INIT));

    ticks(&mut h, 4);

    let status = h.engine.status();
    assert_eq!(status.state.bits(), 0);
    assert_eq!(status.move_mode, MoveMode::Idle);
    assert_eq!(status.alarm_type, AlarmType::Off);
    assert!(h.engine.stack().is_empty());
    // The startup record plus at least one tick report came through.
    assert!(h.statuses.try_iter().count() >= 2);
}

#[test]
fn sync_establishes_the_zero_point() {
    let mut h = harness(bench_config());
    h.engine.start().unwrap();
    ticks(&mut h, 4);

    h.commands.send(command(MoveMode::Sync)).unwrap();
    ticks(&mut h, 8);

    let cfg = h.engine.config();
    // Simulated axes report zero, so the zero point lands there.
    assert_eq!(cfg.zeropt, Some([0, 0]));
    let zero_mjd = cfg.zero_mjd.expect("zero mjd set");
    assert!((zero_mjd - astro_math::mjd_from_datetime(t0())).abs() < 1e-9);
    assert_eq!(cfg.ptg_offset, [0, 0]);
    assert!(h.engine.stack().is_empty());
    assert_eq!(h.engine.status().alarm_type, AlarmType::Off);
}

#[test]
fn slew_targets_follow_the_coordinate_pipeline() {
    let mut h = harness(bench_config());
    h.engine.start().unwrap();
    ticks(&mut h, 4);
    h.commands.send(command(MoveMode::Sync)).unwrap();
    ticks(&mut h, 8);

    // Near the meridian for this site and instant.
    let ra = 350.0;
    let dec = 30.0;
    let mut slew = command(MoveMode::Slew);
    slew.ra = ra;
    slew.dec = dec;
    h.commands.send(slew).unwrap();

    // Accept on one tick, activate on the next.
    ticks(&mut h, 1);
    assert_eq!(h.engine.stack().top().unwrap().mode(), MoveMode::Slew);
    ticks(&mut h, 1);

    // Replicate the activation arithmetic with the public pipeline.
    let cfg = h.engine.config().clone();
    let enc_now = coords::coord_to_enc(ra, dec, &cfg, t0(), 0.0);
    let fvel = [
        cfg.max_vel[0] * cfg.deg2enc[0] * 50.0 / 100.0,
        cfg.max_vel[1] * cfg.deg2enc[1] * 50.0 / 100.0,
    ];
    let mut deltim: f64 = 0.0;
    for i in 0..2 {
        deltim = deltim.max((enc_now[i].abs() as f64) / fvel[i]);
    }
    let expected = coords::coord_to_enc(ra, dec, &cfg, t0(), deltim / 86400.0);

    let top = h.engine.stack().top().unwrap();
    assert_eq!(top.mode(), MoveMode::Slew);
    assert_eq!(top.encpos, expected);
    // Declination is a direct mapping, modulo precession.
    assert!((top.encpos[1] - (dec * cfg.deg2enc[1]) as i64).abs() < 200);

    let status = h.engine.status();
    assert_eq!(status.ra, ra);
    assert_eq!(status.dec, dec);
    assert_eq!(status.slew_spd, fvel[0].trunc());
    assert!(status.state.contains(StateBits::MOVE));

    // The slew completes and hands over to tracking.
    ticks(&mut h, 2);
    assert_eq!(h.engine.status().move_mode, MoveMode::Track);
    assert!(h.engine.status().trk_spd > 0.0);
    // Tracking dropped the MOVE bit.
    assert!(!h.engine.status().state.contains(StateBits::MOVE));

    // With the simulated axes always quiet, tracking "finishes" too and
    // the stack drains.
    ticks(&mut h, 2);
    assert_eq!(h.engine.status().move_mode, MoveMode::Idle);
    assert!(h.engine.stack().is_empty());
}

#[test]
fn slew_with_autofocus_splices_a_focus_move() {
    let mut cfg = bench_config();
    cfg.focmod = FocusModel {
        terms: vec![FocusTerm {
            pattern: "1".into(),
            value: 27.0,
        }],
    };
    let mut h = harness(cfg);
    h.engine.start().unwrap();
    ticks(&mut h, 4);
    h.commands.send(command(MoveMode::Sync)).unwrap();
    ticks(&mut h, 8);

    let mut slew = command(MoveMode::Slew);
    slew.ra = 350.0;
    slew.dec = 30.0;
    slew.flags = CmdFlags::AUTO_FOCUS;
    h.commands.send(slew).unwrap();
    ticks(&mut h, 1);

    let modes: Vec<MoveMode> = h.engine.stack().iter().map(|c| c.mode()).collect();
    assert_eq!(
        modes,
        vec![MoveMode::Slew, MoveMode::FocusMove, MoveMode::Track]
    );
    // Everything but the tracker is marked to keep MOVE up on completion.
    for c in h.engine.stack().iter() {
        if c.mode() != MoveMode::Track {
            assert!(c.nozero, "{:?} should not clear MOVE", c.mode());
        }
    }
}

#[test]
fn alert_move_preempts_everything() {
    let mut h = harness(bench_config());
    h.engine.start().unwrap();
    ticks(&mut h, 4);

    h.commands.send(command(MoveMode::Standby)).unwrap();
    ticks(&mut h, 1);
    assert!(!h.engine.stack().is_empty());

    let mut urgent = command(MoveMode::Idle);
    urgent.flags = CmdFlags::ALERT_MOVE;
    h.commands.send(urgent).unwrap();
    ticks(&mut h, 1);

    // Stack was cleared before the alert command went on.
    let modes: Vec<MoveMode> = h.engine.stack().iter().map(|c| c.mode()).collect();
    assert_eq!(modes, vec![MoveMode::Idle, MoveMode::Zeros]);
}

#[test]
fn reset_signal_idles_a_moving_mount() {
    let mut h = harness(bench_config());
    h.engine.start().unwrap();
    ticks(&mut h, 4);
    h.commands.send(command(MoveMode::Sync)).unwrap();
    ticks(&mut h, 2);
    // Mid-sequence: MOVE is up.
    assert!(h.engine.status().state.contains(StateBits::MOVE));

    h.signals.raise_reset();
    ticks(&mut h, 1);

    assert!(h.engine.stack().is_empty());
    assert!(!h.engine.status().state.contains(StateBits::MOVE));
    assert_eq!(h.engine.status().move_mode, MoveMode::Idle);
}

/// A scheduler that never drains its status slot.
struct StallingSink;

impl StatusSink for StallingSink {
    fn publish(&mut self, _status: &MountStatus) -> Result<bool, IpcError> {
        Ok(false)
    }
}

#[test]
fn absent_status_consumer_is_fatal() {
    let clock = ManualClock::new(t0());
    let (_commands, source) = ChannelCommandSource::new();
    let io = EngineIo {
        mount_port: Box::new(NullPort),
        focus_port: Box::new(NullPort),
        clock: Box::new(clock.clone()),
        source: Box::new(source),
        sink: Box::new(StallingSink),
        mailer: Box::new(NullMailer),
        cal_feed: None,
        focus_feed: None,
        signals: SignalFlags::new(),
        config_path: None,
    };
    let mut engine = MountEngine::new(bench_config(), io);
    engine.start().unwrap();

    let mut failed = false;
    for _ in 0..10 {
        if engine.tick().is_err() {
            failed = true;
            break;
        }
    }
    assert!(failed, "engine kept running without a status consumer");
}

#[derive(Clone)]
struct StubCalFeed {
    row: Arc<Mutex<Option<CalRecord>>>,
    recorded: Arc<Mutex<Vec<(f64, f64, f64, f64)>>>,
}

impl StubCalFeed {
    fn new() -> Self {
        StubCalFeed {
            row: Arc::new(Mutex::new(None)),
            recorded: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl CalibrationFeed for StubCalFeed {
    fn latest(&mut self) -> Result<Option<CalRecord>, FeedError> {
        Ok(*self.row.lock().unwrap())
    }

    fn record_pointing_update(
        &mut self,
        pra: f64,
        rra: f64,
        pdec: f64,
        rdec: f64,
    ) -> Result<(), FeedError> {
        self.recorded.lock().unwrap().push((pra, rra, pdec, rdec));
        Ok(())
    }
}

#[test]
fn calibration_rows_refine_the_pointing_offset() {
    let feed = StubCalFeed::new();
    let mut h = harness_with_feeds(bench_config(), Some(Box::new(feed.clone())), None);
    h.engine.start().unwrap();
    ticks(&mut h, 4);
    h.commands.send(command(MoveMode::Sync)).unwrap();
    ticks(&mut h, 8);
    let zero_mjd = h.engine.config().zero_mjd.unwrap();

    // A calibrated exposure taken shortly after the sync whose astrometry
    // landed half a degree east of the encoder solution.
    let row = CalRecord {
        mjd: zero_mjd + 30.0 / 86400.0,
        pra: 350.0,
        pdec: 30.0,
        rra: 350.5,
        rdec: 30.0,
        encra: 350.0,
        encdec: 30.0,
        mlim: 15.0,
    };
    *feed.row.lock().unwrap() = Some(row);

    // Replicate the update arithmetic before letting the engine at it.
    h.clock.advance(chrono::Duration::seconds(150));
    let now = h.clock.now();
    let nmjd = astro_math::mjd_from_datetime(now);
    let cfg = h.engine.config().clone();
    let orig = coords::radec_to_enc_raw(row.encra, row.encdec, row.mjd, &cfg);
    let new = coords::coord_to_enc(row.rra, row.rdec, &cfg, now, row.mjd - nmjd);
    let expected = [orig[0] - new[0], orig[1] - new[1]];
    assert!(expected[0] != 0, "test row should produce a real offset");

    ticks(&mut h, 1);

    let cfg = h.engine.config();
    assert_eq!(cfg.ptg_offset, expected);
    assert!((cfg.zero_mjd.unwrap() - nmjd).abs() < 1e-9);
    assert_eq!(
        feed.recorded.lock().unwrap().as_slice(),
        &[(row.pra, row.rra, row.pdec, row.rdec)]
    );

    // A wild solution (two degrees off in RA) gets its RA component
    // clipped to zero rather than absorbed.
    let offset_after_first = cfg.ptg_offset;
    let wild = CalRecord {
        rra: 352.0,
        mjd: nmjd + 30.0 / 86400.0,
        ..row
    };
    *feed.row.lock().unwrap() = Some(wild);
    h.clock.advance(chrono::Duration::seconds(150));
    ticks(&mut h, 1);

    let cfg = h.engine.config();
    assert_eq!(cfg.ptg_offset[0], offset_after_first[0]);
}

#[derive(Clone)]
struct StubFocusFeed {
    sample: Arc<Mutex<Option<FocusSample>>>,
    recorded: Arc<Mutex<Vec<(f64, f64)>>>,
}

impl FocusFeed for StubFocusFeed {
    fn latest(&mut self) -> Result<Option<FocusSample>, FeedError> {
        Ok(*self.sample.lock().unwrap())
    }

    fn record_focus_update(&mut self, old_focus: f64, new_focus: f64) -> Result<(), FeedError> {
        self.recorded.lock().unwrap().push((old_focus, new_focus));
        Ok(())
    }
}

#[test]
fn focus_measurements_shift_the_constant_term() {
    let mut cfg = bench_config();
    cfg.focmod = FocusModel {
        terms: vec![
            FocusTerm {
                pattern: "1".into(),
                value: 10.0,
            },
            FocusTerm {
                pattern: "t".into(),
                value: 0.5,
            },
        ],
    };
    let feed = StubFocusFeed {
        sample: Arc::new(Mutex::new(None)),
        recorded: Arc::new(Mutex::new(Vec::new())),
    };
    let mut h = harness_with_feeds(cfg, None, Some(Box::new(feed.clone())));
    h.engine.start().unwrap();
    ticks(&mut h, 2);

    // Model says 10 + 0.5*8 = 14; the sky says 15.5.
    *feed.sample.lock().unwrap() = Some(FocusSample {
        mjd: astro_math::mjd_from_datetime(t0()) + 0.01,
        focus: 15.5,
        az: 120.0,
        el: 45.0,
        temp: 8.0,
    });
    h.clock.advance(chrono::Duration::seconds(400));
    ticks(&mut h, 1);

    let focmod = &h.engine.config().focmod;
    assert!((focmod.terms[0].value - 11.5).abs() < 1e-9);
    assert!((focmod.terms[1].value - 0.5).abs() < 1e-9);
    assert_eq!(feed.recorded.lock().unwrap().as_slice(), &[(10.0, 11.5)]);

    // The same measurement again is institutional memory, not a new update.
    h.clock.advance(chrono::Duration::seconds(400));
    ticks(&mut h, 1);
    assert!((h.engine.config().focmod.terms[0].value - 11.5).abs() < 1e-9);
}
