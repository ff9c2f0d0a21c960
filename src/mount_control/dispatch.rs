use crate::coords;
use crate::mount_control::command::{CmdState, Command, MoveOp};
use crate::mount_control::MountEngine;
use crate::util::consts::{
    SIDEREAL_RATE, STANDBY_SPEED, TRACK_LIMIT_DEG, TRACK_LOOKAHEAD,
};
use crate::util::{AlarmType, Axis, CmdFlags, FatalError, MotionError, MoveMode, StateBits};
use std::io::Write;
use tracing::{error, info};

impl MountEngine {
    /// Activate the top of the stack: dispatch its operation to the
    /// hardware and mark it running.
    pub(crate) fn activate_top(&mut self) -> Result<(), FatalError> {
        let Some(mut cmd) = self.stack.top().cloned() else {
            return Ok(());
        };
        self.dispatch(&mut cmd)?;
        cmd.state = CmdState::Running;
        if cmd.mode() == MoveMode::Sync {
            self.established = false;
        }
        // Tell everyone what we are busy doing.
        self.status.move_mode = cmd.mode();
        if let Some(top) = self.stack.top_mut() {
            *top = cmd;
        }
        Ok(())
    }

    /// Send one operation to the controllers. Target rejections are
    /// handled inside (the move is cancelled, nothing escalates); anything
    /// else that fails here is engine-fatal.
    pub(crate) fn dispatch(&mut self, cmd: &mut Command) -> Result<(), FatalError> {
        match cmd.op.clone() {
            MoveOp::Idle => self.dispatch_idle().map_err(FatalError::from),
            MoveOp::Init => {
                info!("initializing mount");
                self.init_mount().map_err(FatalError::from)
            }
            MoveOp::Sync => self.dispatch_sync().map_err(FatalError::from),
            MoveOp::Run => self.dispatch_run().map_err(FatalError::from),
            MoveOp::Halt => self.dispatch_halt().map_err(FatalError::from),
            MoveOp::Standby => self.dispatch_standby(cmd),
            MoveOp::Zeros => self.dispatch_zeros(cmd).map_err(FatalError::from),
            MoveOp::Stow | MoveOp::Park => self.dispatch_stow().map_err(FatalError::from),
            MoveOp::Track { .. } => self.dispatch_track(cmd).map_err(FatalError::from),
            MoveOp::TrackRa => self.dispatch_track_ra(cmd).map_err(FatalError::from),
            MoveOp::Slew {
                ra,
                dec,
                slew_spd,
                dectrack,
                ..
            } => self
                .dispatch_slew(cmd, ra, dec, slew_spd, dectrack)
                .map_err(FatalError::from),
            MoveOp::Shift {
                dra,
                ddec,
                slew_spd,
                flags,
            } => self
                .dispatch_shift(cmd, dra, ddec, slew_spd, flags)
                .map_err(FatalError::from),
            MoveOp::FocusOn | MoveOp::FocusInit => self.focus.motor_on().map_err(FatalError::from),
            MoveOp::FocusOff => self.focus.motor_off().map_err(FatalError::from),
            MoveOp::FocusSync => {
                info!("syncing focus to the reference stop");
                self.focus.sync().map_err(FatalError::from)?;
                self.status.state.set(StateBits::MOVE);
                Ok(())
            }
            MoveOp::FocusZeros => {
                info!("zeroing focus");
                self.focus.zero().map_err(FatalError::from)
            }
            MoveOp::FocusMove { target } => {
                let clamped = if target > self.cfg.focrange[1] {
                    error!(
                        "focus command too large, setting to {}",
                        self.cfg.focrange[1]
                    );
                    self.cfg.focrange[1]
                } else if target < self.cfg.focrange[0] {
                    error!(
                        "focus command too small, setting to {}",
                        self.cfg.focrange[0]
                    );
                    self.cfg.focrange[0]
                } else {
                    target
                };
                cmd.op = MoveOp::FocusMove { target: clamped };
                info!("moving focus to {:.3}", clamped);
                self.focus.set_pos(clamped).map_err(FatalError::from)?;
                self.status.state.set(StateBits::MOVE);
                Ok(())
            }
        }
    }

    /// Zero the velocities and retarget the current trajectory position.
    fn dispatch_idle(&mut self) -> Result<(), crate::util::CommError> {
        info!("idling mount");
        self.mount.set_vel_counts(Axis::Ra, 0)?;
        self.mount.set_vel_counts(Axis::Dec, 0)?;
        let s = self.sample_axes()?;
        self.mount.set_pos(Axis::Ra, s[0].command)?;
        self.mount.set_pos(Axis::Dec, s[1].command)?;
        self.status.trk_spd = 0.0;
        self.status.slew_spd = 0.0;
        Ok(())
    }

    /// Drop the encoder reference and send both axes home.
    fn dispatch_sync(&mut self) -> Result<(), crate::util::CommError> {
        self.status.state.set(StateBits::MOVE);
        info!("homing both axes");
        self.cfg.zeropt = None;
        self.cfg.ptg_offset = [0, 0];
        self.cfg.zero_mjd = None;

        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            let vel = (self.cfg.home_vel[i] * self.cfg.deg2enc[i]) as i64;
            self.mount.set_vel_counts(axis, vel)?;
        }
        for axis in Axis::BOTH {
            self.mount.stop_axis(axis)?;
        }
        for axis in Axis::BOTH {
            self.mount.home(axis)?;
        }
        self.status.slew_spd = (self.cfg.home_vel[0] * self.cfg.deg2enc[0]).trunc();
        self.status.trk_spd = 0.0;
        Ok(())
    }

    fn dispatch_run(&mut self) -> Result<(), crate::util::CommError> {
        self.status.state.set(StateBits::MOVE);
        info!("running both axes");
        self.mount.set_vel_counts(Axis::Ra, 0)?;
        self.mount.set_vel_counts(Axis::Dec, 0)?;
        for axis in Axis::BOTH {
            self.mount.stop_axis(axis)?;
        }
        for axis in Axis::BOTH {
            self.mount.run(axis)?;
        }
        self.status.slew_spd = 0.0;
        self.status.trk_spd = 0.0;
        Ok(())
    }

    pub(crate) fn dispatch_halt(&mut self) -> Result<(), crate::util::CommError> {
        self.mount.halt(Axis::Ra)?;
        self.mount.halt(Axis::Dec)?;
        self.status.trk_spd = 0.0;
        self.status.slew_spd = 0.0;
        Ok(())
    }

    /// Move to the standby position at half speed. An out-of-range
    /// standby position is a configuration problem, not a command one.
    fn dispatch_standby(&mut self, cmd: &mut Command) -> Result<(), FatalError> {
        info!("moving to standby");
        self.status.state.set(StateBits::MOVE);
        let zeropt = self.cfg.zeropt_or_zero();
        let mut fvel = [0.0; 2];
        for i in 0..2 {
            fvel[i] = self.cfg.max_vel[i] * self.cfg.deg2enc[i] * STANDBY_SPEED / 100.0;
            cmd.encpos[i] =
                (self.cfg.standbypos[i] * self.cfg.deg2enc[i]).round() as i64 + zeropt[i];
        }
        self.status.ra = 0.0;
        self.status.dec = 0.0;
        self.status.slew_spd = STANDBY_SPEED;
        self.status.trk_spd = 0.0;

        self.move_to(cmd.encpos, fvel, true)
            .map_err(|e| FatalError::new(format!("standby move failed: {}", e)))
    }

    /// Follow the target at the velocity derived during slew activation,
    /// aimed at the range edge the velocity is carrying us toward.
    fn dispatch_track(&mut self, cmd: &mut Command) -> Result<(), crate::util::CommError> {
        // Tracking is interruptible, so it does not hold the MOVE bit.
        self.status.state.clear(StateBits::MOVE);
        let zeropt = self.cfg.zeropt_or_zero();
        let fvel = [self.track_vel[0].abs(), self.track_vel[1].abs()];

        let ra_edge = if self.track_vel[0] > 0.0 {
            self.cfg.rarange[1]
        } else {
            self.cfg.rarange[0]
        };
        let dec_edge = if self.track_vel[1] > 0.0 {
            self.cfg.decrange[1]
        } else {
            self.cfg.decrange[0]
        };
        cmd.encpos[0] =
            (ra_edge * self.cfg.deg2enc[0]).round() as i64 + zeropt[0] + self.cfg.ptg_offset[0];
        cmd.encpos[1] =
            (dec_edge * self.cfg.deg2enc[1]).round() as i64 + zeropt[1] + self.cfg.ptg_offset[1];

        self.status.slew_spd = 0.0;
        self.status.trk_spd = (fvel[0] * fvel[0] + fvel[1] * fvel[1]).sqrt();

        match self.move_to(cmd.encpos, fvel, true) {
            Ok(()) => Ok(()),
            Err(MotionError::OutOfRange { .. }) => self.cancel_move(cmd, 0.0, 0.0),
            Err(MotionError::Comm(e)) => Err(e),
        }
    }

    /// Track in RA at the sidereal rate out to the range edge.
    fn dispatch_track_ra(&mut self, cmd: &mut Command) -> Result<(), crate::util::CommError> {
        self.status.state.clear(StateBits::MOVE);
        let zeropt = self.cfg.zeropt_or_zero();
        let mut fvel = [SIDEREAL_RATE * self.cfg.deg2enc[0], 0.0];
        if self.cfg.latitude < 0.0 {
            fvel[0] = -fvel[0];
        }
        cmd.encpos[0] = (self.cfg.rarange[1] * self.cfg.deg2enc[0]).round() as i64
            + zeropt[0]
            + self.cfg.ptg_offset[0];
        cmd.encpos[1] = (self.cfg.decrange[1] * self.cfg.deg2enc[1]).round() as i64
            + zeropt[1]
            + self.cfg.ptg_offset[1];

        self.status.trk_spd = (SIDEREAL_RATE * self.cfg.deg2enc[0]).trunc();
        self.status.slew_spd = 0.0;

        match self.move_to(cmd.encpos, fvel, true) {
            Ok(()) => Ok(()),
            Err(MotionError::OutOfRange { .. }) => self.cancel_move(cmd, 0.0, 0.0),
            Err(MotionError::Comm(e)) => Err(e),
        }
    }

    /// Send both axes to the stow target established at the last zeros.
    fn dispatch_stow(&mut self) -> Result<(), crate::util::CommError> {
        info!("moving to stow");
        self.status.state.set(StateBits::MOVE);
        self.mount.set_vel_counts(Axis::Ra, self.stow_vel[0])?;
        self.mount.set_vel_counts(Axis::Dec, self.stow_vel[1])?;
        self.mount.set_pos(Axis::Ra, self.stow_target[0])?;
        self.mount.set_pos(Axis::Dec, self.stow_target[1])?;
        Ok(())
    }

    /// Adopt the current trajectory position as the encoder reference and
    /// derive the stow target from it.
    fn dispatch_zeros(&mut self, cmd: &mut Command) -> Result<(), crate::util::CommError> {
        info!("establishing encoder zero points");
        let s = self.sample_axes()?;
        let zeropt = [s[0].command, s[1].command];
        self.cfg.zeropt = Some(zeropt);
        info!("zero point: {}, {}", zeropt[0], zeropt[1]);
        self.cfg.zero_mjd = Some(self.clock.now_mjd());

        if !cmd.nozero {
            self.status.state.clear(StateBits::ALARM);
            self.status.alarm_type = AlarmType::Off;
        }

        self.established = true;
        for i in 0..2 {
            self.stow_target[i] =
                (self.cfg.stowpos[i] * self.cfg.deg2enc[i]).round() as i64 + zeropt[i];
            self.stow_vel[i] = (self.cfg.home_vel[i] * self.cfg.deg2enc[i]) as i64;
        }
        info!(
            "stow target = {}, {} at {}, {} counts/s",
            self.stow_target[0], self.stow_target[1], self.stow_vel[0], self.stow_vel[1]
        );
        Ok(())
    }

    /// Convert the target, derive the tracking velocity from a one-minute
    /// look-ahead, pre-aim the endpoint at the estimated arrival time, and
    /// go.
    fn dispatch_slew(
        &mut self,
        cmd: &mut Command,
        ra: f64,
        dec: f64,
        slew_spd: u8,
        dectrack: f64,
    ) -> Result<(), crate::util::CommError> {
        self.status.state.set(StateBits::MOVE);
        let now = self.clock.now();

        cmd.encpos = coords::coord_to_enc(ra, dec, &self.cfg, now, 0.0);
        let mut future =
            coords::coord_to_enc(ra, dec, &self.cfg, now, TRACK_LOOKAHEAD / 86400.0);

        // A target about to track out of the legal range goes to standby
        // instead.
        let mut limit_problem = false;
        let over = |axis: usize| {
            (future[axis] - cmd.encpos[axis]).abs()
                > (TRACK_LIMIT_DEG * self.cfg.deg2enc[axis]) as i64
        };
        if over(0) || over(1) {
            error!("tracking over limit: sending to standby");
            let zeropt = self.cfg.zeropt_or_zero();
            for i in 0..2 {
                cmd.encpos[i] =
                    (self.cfg.standbypos[i] * self.cfg.deg2enc[i]).round() as i64 + zeropt[i];
            }
            future = cmd.encpos;
            limit_problem = true;
        }

        for i in 0..2 {
            self.track_vel[i] = (future[i] - cmd.encpos[i]) as f64 / TRACK_LOOKAHEAD;
        }
        // Optional extra declination drift.
        self.track_vel[1] += dectrack * self.cfg.deg2enc[1];

        let mut fvel = [0.0; 2];
        for i in 0..2 {
            fvel[i] =
                self.cfg.max_vel[i] * self.cfg.deg2enc[i] * f64::from(slew_spd) / 100.0;
        }

        // Estimate the slew duration and re-aim the endpoint at arrival.
        let s = self.sample_axes()?;
        let mut deltim: f64 = 0.0;
        for i in 0..2 {
            if fvel[i] > 0.0 {
                let t = ((s[i].command - cmd.encpos[i]).abs() as f64) / fvel[i];
                deltim = deltim.max(t);
            }
        }
        if !limit_problem {
            cmd.encpos = coords::coord_to_enc(ra, dec, &self.cfg, now, deltim / 86400.0);
        }

        let old_ra = self.status.ra;
        let old_dec = self.status.dec;
        self.status.ra = ra;
        self.status.dec = dec;
        self.status.slew_spd = fvel[0].trunc();
        self.status.trk_spd = 0.0;

        match self.move_to(cmd.encpos, fvel, true) {
            Ok(()) => Ok(()),
            Err(MotionError::OutOfRange { .. }) => self.cancel_move(cmd, old_ra, old_dec),
            Err(MotionError::Comm(e)) => Err(e),
        }
    }

    /// Nudge the mount by a delta from wherever it currently is.
    fn dispatch_shift(
        &mut self,
        cmd: &mut Command,
        dra: f64,
        ddec: f64,
        slew_spd: u8,
        flags: CmdFlags,
    ) -> Result<(), crate::util::CommError> {
        self.status.state.set(StateBits::MOVE);

        let s = self.sample_axes()?;
        cmd.encpos = [s[0].command, s[1].command];
        coords::shift_delta(dra, ddec, &self.cfg, &mut cmd.encpos);

        let mut fvel = [0.0; 2];
        for i in 0..2 {
            fvel[i] =
                self.cfg.max_vel[i] * self.cfg.deg2enc[i] * f64::from(slew_spd) / 100.0;
        }

        let result = match self.move_to(cmd.encpos, fvel, true) {
            Ok(()) => Ok(()),
            Err(MotionError::OutOfRange { .. }) => self.cancel_move(cmd, 0.0, 0.0),
            Err(MotionError::Comm(e)) => Err(e),
        };
        self.status.slew_spd = fvel[0].trunc();
        self.status.trk_spd = 0.0;

        if flags.contains(CmdFlags::RECORD_VOLTAGE) {
            self.open_voltage_log();
        }
        result
    }

    /// Start a voltage trace for this shift; the poller appends a line per
    /// sample and closes the file when the mount goes idle.
    fn open_voltage_log(&mut self) {
        let t = self.clock.now();
        let path = std::env::temp_dir().join(format!(
            "voltage-{}-{}.dat",
            t.format("%H-%M-%S"),
            std::process::id()
        ));
        match std::fs::File::create(&path) {
            Ok(mut f) => {
                let _ = writeln!(f, "# encpos_ra v_ra encpos_dec v_dec");
                info!("voltage file: {}", path.display());
                self.voltage_log = Some(f);
            }
            Err(e) => error!("could not open voltage file {}: {}", path.display(), e),
        }
    }
}
