pub mod calibration;
pub mod comm;
pub mod command;
mod dispatch;
mod motion;
mod poll;
mod recovery;
pub mod protocol;

pub use command::{CmdState, Command, CommandStack, MoveOp};
pub use protocol::{AxisSample, FocusProtocol, MountProtocol};

use crate::config::MountConfig;
use crate::coords;
use crate::ipc::{CommandSource, IncomingCommand, MountStatus, StatusSink};
use crate::util::consts::{FOCUS_OFFSET_DELAY, OFFSET_DELAY, PEER_TIMEOUT};
use crate::util::{
    AlarmType, AxisStatus, Clock, CmdFlags, FatalError, Mailer, MoveMode, SignalFlags, StateBits,
};
use calibration::{CalibrationFeed, FocusFeed};
use comm::Port;
use poll::{FocusPollState, MountPollState};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything injected into the engine: transports, time, the scheduler
/// link, calibration feeds, and the signal flags.
pub struct EngineIo {
    pub mount_port: Box<dyn Port>,
    pub focus_port: Box<dyn Port>,
    pub clock: Box<dyn Clock>,
    pub source: Box<dyn CommandSource>,
    pub sink: Box<dyn StatusSink>,
    pub mailer: Box<dyn Mailer>,
    pub cal_feed: Option<Box<dyn CalibrationFeed>>,
    pub focus_feed: Option<Box<dyn FocusFeed>>,
    pub signals: SignalFlags,
    /// Where to re-read configuration from on a reload signal.
    pub config_path: Option<PathBuf>,
}

/// The mount controller: one loop iteration per timer tick, everything on
/// one thread. Owns both serial protocols, the command stack, and all the
/// bookkeeping that was process-global in older controllers of this kind.
pub struct MountEngine {
    pub(crate) cfg: MountConfig,
    pub(crate) mount: MountProtocol,
    pub(crate) focus: FocusProtocol,
    pub(crate) clock: Box<dyn Clock>,
    source: Box<dyn CommandSource>,
    sink: Box<dyn StatusSink>,
    pub(crate) mailer: Box<dyn Mailer>,
    pub(crate) cal_feed: Option<Box<dyn CalibrationFeed>>,
    pub(crate) focus_feed: Option<Box<dyn FocusFeed>>,
    signals: SignalFlags,
    config_path: Option<PathBuf>,

    pub(crate) status: MountStatus,
    pub(crate) stack: CommandStack,

    /// Set once a zeros command has established the encoder reference.
    pub(crate) established: bool,
    pub(crate) stow_target: [i64; 2],
    pub(crate) stow_vel: [i64; 2],
    /// Limit bits recorded by the poller for the recovery classifier.
    pub(crate) limit_status: [AxisStatus; 2],
    /// Status-2 bits from the most recent poll.
    pub(crate) poll_statbits: [AxisStatus; 2],
    /// Tracking velocity derived at slew activation, counts per second.
    pub(crate) track_vel: [f64; 2],
    pub(crate) last_volt: [f64; 2],

    pub(crate) mount_retry: u32,
    pub(crate) focus_retry: u32,
    pub(crate) poll_state: MountPollState,
    pub(crate) focus_poll: FocusPollState,

    alert_move_seen: bool,
    pub(crate) sendstat: bool,
    last_movebit: bool,
    unread_publishes: u32,
    last_publish_mjd: f64,
    last_offset_mjd: f64,
    last_focoffset_mjd: f64,
    pub(crate) focus_last_mjd: f64,
    pub(crate) voltage_log: Option<std::fs::File>,
}

impl MountEngine {
    pub fn new(cfg: MountConfig, io: EngineIo) -> Self {
        let testmode = cfg.testmode;
        MountEngine {
            mount: MountProtocol::new(io.mount_port, testmode),
            focus: FocusProtocol::new(io.focus_port, testmode),
            clock: io.clock,
            source: io.source,
            sink: io.sink,
            mailer: io.mailer,
            cal_feed: io.cal_feed,
            focus_feed: io.focus_feed,
            signals: io.signals,
            config_path: io.config_path,
            cfg,
            status: MountStatus::default(),
            stack: CommandStack::new(),
            established: false,
            stow_target: [0, 0],
            stow_vel: [0, 0],
            limit_status: [AxisStatus::empty(); 2],
            poll_statbits: [AxisStatus::empty(); 2],
            track_vel: [0.0, 0.0],
            last_volt: [0.0, 0.0],
            mount_retry: 0,
            focus_retry: 0,
            poll_state: MountPollState::default(),
            focus_poll: FocusPollState::default(),
            alert_move_seen: false,
            sendstat: true,
            last_movebit: false,
            unread_publishes: 0,
            last_publish_mjd: 0.0,
            last_offset_mjd: 0.0,
            last_focoffset_mjd: 0.0,
            focus_last_mjd: 0.0,
            voltage_log: None,
        }
    }

    pub fn status(&self) -> &MountStatus {
        &self.status
    }

    pub fn config(&self) -> &MountConfig {
        &self.cfg
    }

    /// Pending commands, top first. Diagnostic view only.
    pub fn stack(&self) -> &CommandStack {
        &self.stack
    }

    /// Queue the initialization sequence and publish the first status
    /// record. Call once before ticking.
    pub fn start(&mut self) -> Result<(), FatalError> {
        self.push_or_fatal(Command::new(MoveOp::Init))?;
        self.status.state = StateBits::empty();
        self.status.state.set(StateBits::INIT);
        self.status.alarm_type = AlarmType::Off;

        let now = self.clock.now_mjd();
        self.status.tlast_mjd = now;
        self.last_publish_mjd = now;
        self.last_offset_mjd = now;
        self.last_focoffset_mjd = now;
        if let Err(e) = self.sink.publish(&self.status) {
            return Err(e.into());
        }
        info!(
            "mount engine started (make {:?}, model {:?}, s/n {})",
            self.cfg.mntman, self.cfg.mntmodel, self.cfg.mntsn
        );
        Ok(())
    }

    /// Drive the engine at the configured poll period until a fatal fault.
    pub async fn run(&mut self) -> Result<(), FatalError> {
        self.start()?;
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.cfg.poll_time));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(fatal) = self.tick() {
                error!("fatal: {}", fatal);
                self.shutdown();
                return Err(fatal);
            }
        }
    }

    /// One loop iteration: signals, stack advance, both polls, command
    /// intake, publication, and the slow calibration sub-ticks.
    pub fn tick(&mut self) -> Result<(), FatalError> {
        self.handle_signals()?;
        self.advance_stack()?;
        self.poll_mount()?;
        self.poll_focus()?;
        self.accept_command()?;
        self.publish_status()?;
        self.run_subticks();
        Ok(())
    }

    fn advance_stack(&mut self) -> Result<(), FatalError> {
        if self.stack.is_empty() {
            self.status.move_mode = MoveMode::Idle;
            return Ok(());
        }
        self.sendstat = true;
        match self.stack.top().map(|c| c.state).unwrap() {
            CmdState::Running => {
                // Still busy; nothing to report yet.
                self.sendstat = false;
            }
            CmdState::Inactive => self.activate_top()?,
            CmdState::Complete => {
                let done = self.stack.pop().unwrap();
                if !done.nozero {
                    self.status.state.clear(StateBits::MOVE);
                }
                if done.mode() == MoveMode::Init {
                    debug!("initialization complete");
                    self.status.state.clear(StateBits::INIT);
                }
                if matches!(done.mode(), MoveMode::Zeros | MoveMode::Run) {
                    self.status.state.clear(StateBits::ALARM);
                    self.status.alarm_type = AlarmType::Off;
                }
            }
        }
        Ok(())
    }

    /// Take one scheduler command, splice the supporting commands under it
    /// (zeros underlay, focus move, tracking overlay), and push it on top.
    fn accept_command(&mut self) -> Result<(), FatalError> {
        let Some(inc) = self.source.try_recv().map_err(FatalError::from)? else {
            return Ok(());
        };

        // Echo a busy status immediately so the scheduler sees MOVE go up
        // before the command is even stacked.
        if matches!(
            inc.move_mode,
            MoveMode::Sync
                | MoveMode::Slew
                | MoveMode::Stow
                | MoveMode::Park
                | MoveMode::Shift
                | MoveMode::Standby
                | MoveMode::FocusMove
                | MoveMode::FocusSync
                | MoveMode::Idle
        ) {
            let saved = self.status.state;
            self.status.state.set(StateBits::MOVE);
            match self.sink.publish(&self.status) {
                Err(e) => return Err(e.into()),
                Ok(false) => debug!("could not raise MOVE early; scheduler busy"),
                Ok(true) => {}
            }
            self.status.state = saved;
        }

        info!("received new command: {:?}", inc.move_mode);

        // A tracking command at the top only exists to be displaced.
        if matches!(
            self.stack.top().map(|c| c.mode()),
            Some(MoveMode::Track) | Some(MoveMode::TrackRa)
        ) {
            self.stack.pop();
        }

        if inc.flags.contains(CmdFlags::ALERT_MOVE) {
            info!("alert move received, clearing the stack");
            self.alert_move_seen = !self.alert_move_seen;
            self.stack.clear();
        } else if self.alert_move_seen {
            self.alert_move_seen = false;
        }

        if let Some(top) = self.stack.top_mut() {
            if top.state == CmdState::Running {
                error!("command {:?} received while active", inc.move_mode);
                top.state = CmdState::Inactive;
            }
        }

        let Some(mut cmd) = Command::from_incoming(&inc) else {
            self.source.acknowledge().map_err(FatalError::from)?;
            return Ok(());
        };

        // Derive the focus target before touching the stack; a target the
        // model cannot produce rejects the whole command.
        let focus_target = if inc.move_mode == MoveMode::Slew && inc.flags.wants_focus() {
            match self.derive_focus(&inc) {
                Some(f) => Some(f),
                None => {
                    error!("no usable focus target; dropping command");
                    self.source.acknowledge().map_err(FatalError::from)?;
                    return Ok(());
                }
            }
        } else {
            None
        };

        if self.cfg.zeropt.is_none() || inc.move_mode == MoveMode::Sync {
            cmd.nozero = true;
            self.push_or_fatal(Command::new(MoveOp::Zeros))?;
        }
        if inc.move_mode == MoveMode::FocusSync {
            cmd.nozero = true;
            self.push_or_fatal(Command::new(MoveOp::FocusZeros))?;
        }

        if inc.move_mode == MoveMode::Slew {
            self.push_or_fatal(Command::new(MoveOp::Track {
                ra: inc.ra,
                dec: inc.dec,
            }))?;
            cmd.nozero = true;

            if let Some(target) = focus_target {
                let mut fcmd = Command::new(MoveOp::FocusMove { target });
                fcmd.nozero = true;
                self.push_or_fatal(fcmd.clone())?;
                // Start the focus moving now, in parallel with the slew;
                // the stacked copy re-issues the (idempotent) move when it
                // reaches the top.
                self.dispatch(&mut fcmd)?;
            }
        }

        self.push_or_fatal(cmd)?;
        self.source.acknowledge().map_err(FatalError::from)?;
        Ok(())
    }

    fn derive_focus(&self, inc: &IncomingCommand) -> Option<f64> {
        let auto = || coords::calc_focus(inc.ra, inc.dec, inc.temp, &self.cfg, self.clock.now());
        let target = if inc.flags.contains(CmdFlags::AUTO_FOCUS) {
            auto()
        } else if inc.flags.contains(CmdFlags::USER_FOCUS) {
            inc.foc
        } else if inc.flags.contains(CmdFlags::OFFSET_FOCUS) {
            auto() + inc.foc
        } else {
            return None;
        };
        if target.is_nan() {
            None
        } else {
            Some(target)
        }
    }

    fn publish_status(&mut self) -> Result<(), FatalError> {
        let movebit = self.status.state.contains(StateBits::MOVE);
        if movebit != self.last_movebit {
            debug!("MOVE bit now {}", movebit);
            self.last_movebit = movebit;
        }

        let now = self.clock.now_mjd();
        if (now - self.last_publish_mjd) * 86400.0 > self.cfg.sample_time {
            self.sendstat = true;
        }
        if !self.sendstat {
            return Ok(());
        }

        self.status.tlast_mjd = now;
        match self.sink.publish(&self.status) {
            Err(e) => return Err(e.into()),
            Ok(true) => self.unread_publishes = 0,
            Ok(false) => {
                self.unread_publishes += 1;
                warn!(
                    "status not drained by scheduler ({} in a row)",
                    self.unread_publishes
                );
                if self.unread_publishes >= PEER_TIMEOUT {
                    return Err(FatalError::new("scheduler not reading status"));
                }
            }
        }
        self.sendstat = false;
        self.last_publish_mjd = now;
        Ok(())
    }

    fn run_subticks(&mut self) {
        let now = self.clock.now_mjd();
        if self.cfg.zero_mjd.is_some() && (now - self.last_offset_mjd) * 86400.0 > OFFSET_DELAY {
            self.last_offset_mjd = now;
            if let Err(e) = self.update_offsets() {
                warn!("pointing update skipped: {}", e);
            }
        }
        if (now - self.last_focoffset_mjd) * 86400.0 > FOCUS_OFFSET_DELAY {
            self.last_focoffset_mjd = now;
            if let Err(e) = self.update_focus() {
                warn!("focus update skipped: {}", e);
            }
        }
    }

    fn handle_signals(&mut self) -> Result<(), FatalError> {
        if self.signals.take_reload() {
            info!("reloading configuration");
            match &self.config_path {
                Some(path) => match MountConfig::load(path) {
                    Ok(mut fresh) => {
                        // Runtime establishment survives a reload.
                        fresh.zeropt = self.cfg.zeropt;
                        fresh.ptg_offset = self.cfg.ptg_offset;
                        fresh.zero_mjd = self.cfg.zero_mjd;
                        self.cfg = fresh;
                        info!("configuration reloaded");
                    }
                    Err(e) => {
                        return Err(FatalError::new(format!("config reload failed: {}", e)))
                    }
                },
                None => warn!("no config path to reload from"),
            }
        }

        if self.signals.take_reset() {
            info!("reset requested");
            if !self.alert_move_seen && self.status.state.contains(StateBits::MOVE) {
                // Nothing has arrived from the scheduler yet; idle the
                // mount ourselves.
                self.stack.clear();
                let mut idle = Command::new(MoveOp::Idle);
                self.dispatch(&mut idle)?;
                self.status.state.clear(StateBits::MOVE);
                self.last_movebit = false;
                self.status.move_mode = MoveMode::Idle;
                self.sendstat = true;
                info!("mount idled after reset");
            }
            self.alert_move_seen = !self.alert_move_seen;
        }
        Ok(())
    }

    pub(crate) fn push_or_fatal(&mut self, cmd: Command) -> Result<(), FatalError> {
        self.stack.push(cmd).map_err(|c| {
            FatalError::new(format!("command stack full pushing {:?}", c.mode()))
        })
    }

    pub(crate) fn send_mail(&mut self, body: &str) {
        if body.len() > 2 {
            self.mailer.alert(body);
            error!("mail alert: {}", body.trim_end());
        }
    }

    /// Best-effort park and cleanup on the way out.
    pub fn shutdown(&mut self) {
        if self.established {
            info!("sending mount to stow before exit");
            let mut park = Command::new(MoveOp::Park);
            if let Err(e) = self.dispatch(&mut park) {
                error!("could not stow on shutdown: {}", e);
            }
        }
        self.voltage_log = None;
    }
}
