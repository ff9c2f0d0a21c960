use crate::coords;
use crate::mount_control::protocol::AxisSample;
use crate::mount_control::{CmdState, MountEngine};
use crate::util::consts::{FOCUS_READ_PAUSE, MAX_STOP_COUNT};
use crate::util::{
    AlarmType, Axis, AxisStatus, CommError, FatalError, MoveMode, StateBits,
};
use std::io::Write;
use tracing::{error, info, warn};

/// Verdict of one status poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Idle,
    Moving,
    Error,
    ErrorShutdown,
}

#[derive(Debug, Default)]
pub(crate) struct MountPollState {
    /// Consecutive stopped-off-target polls, per axis.
    pub stop_ctr: [u32; 2],
}

#[derive(Debug)]
pub(crate) struct FocusPollState {
    pub stop_ctr: u32,
    pub start_ctr: u32,
    /// Polls to wait before believing a stationary reading; raised after a
    /// stall so the next move gets time to spin up.
    pub min_start: u32,
}

impl Default for FocusPollState {
    fn default() -> Self {
        FocusPollState {
            stop_ctr: 0,
            start_ctr: 0,
            min_start: 1,
        }
    }
}

impl MountEngine {
    /// Poll the mount: positions twice with holds and voltages between the
    /// reads (so a moving axis has time to show it), classify, update the
    /// published status, and complete or recover the running command.
    pub(crate) fn poll_mount(&mut self) -> Result<(), FatalError> {
        let first = self.sample_axes().map_err(FatalError::from)?;
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            self.poll_statbits[i] = self.mount.status2(axis).map_err(FatalError::from)?;
        }
        let mut volt = [0.0; 2];
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            volt[i] = self.mount.status3(axis).map_err(FatalError::from)?.0;
        }
        let second = self.sample_axes().map_err(FatalError::from)?;

        if let Some(top) = self.stack.top_mut() {
            top.statbits = self.poll_statbits;
        }

        let verdict = if self.cfg.testmode.no_mount() {
            Verdict::Idle
        } else {
            self.evaluate_mount(&first, &second)
                .map_err(FatalError::from)?
        };

        if verdict == Verdict::Error {
            info!(
                "last voltage: RA = {:.1}, Dec = {:.1}",
                self.last_volt[0], self.last_volt[1]
            );
        }

        let zeropt = self.cfg.zeropt_or_zero();
        self.status.encpos = [
            second[0].actual - zeropt[0],
            second[1].actual - zeropt[1],
        ];
        let (enc_ra, enc_dec) = coords::enc_to_radec(self.status.encpos, &self.cfg, self.clock.now());
        self.status.enc_ra = enc_ra;
        self.status.enc_dec = enc_dec;
        self.status.v_ra = volt[0];
        self.status.v_dec = volt[1];
        self.last_volt = volt;

        if verdict == Verdict::Error {
            error!(
                "mount error at {}, {}",
                self.status.encpos[0], self.status.encpos[1]
            );
        }

        // Voltage trace for shifts that asked for one.
        if let Some(f) = self.voltage_log.as_mut() {
            let _ = writeln!(
                f,
                "{:12}{:6.2}{:12}{:6.2}",
                self.status.encpos[0], self.status.v_ra, self.status.encpos[1], self.status.v_dec
            );
            if verdict == Verdict::Idle {
                self.voltage_log = None;
            }
        }

        match verdict {
            Verdict::Idle => {
                let completed = self
                    .stack
                    .top()
                    .map(|c| c.state == CmdState::Running && c.mode().is_active_mount_op())
                    .unwrap_or(false);
                if completed {
                    let mode = self.stack.top().map(|c| c.mode()).unwrap();
                    self.stack.top_mut().unwrap().state = CmdState::Complete;
                    self.sendstat = true;
                    // A move that lands after an error reset clears one
                    // strike.
                    if matches!(mode, MoveMode::Slew | MoveMode::Shift) && self.mount_retry > 0 {
                        self.mount_retry -= 1;
                    }
                }
                Ok(())
            }
            Verdict::Moving => Ok(()),
            Verdict::Error => {
                self.status.state.set(StateBits::ALARM);
                self.status.alarm_type = AlarmType::Mount;
                self.status.state.set(StateBits::MOVE);
                self.sendstat = true;
                let zalarm = self.recover_mount()?;
                if zalarm {
                    // Plain re-move; no need to alarm the operators.
                    self.status.state.clear(StateBits::ALARM);
                    self.status.alarm_type = AlarmType::Off;
                }
                Ok(())
            }
            Verdict::ErrorShutdown => Err(FatalError::new("unrecoverable axis fault")),
        }
    }

    /// Classify the paired position reads and the held status bits.
    fn evaluate_mount(
        &mut self,
        first: &[AxisSample; 2],
        second: &[AxisSample; 2],
    ) -> Result<Verdict, CommError> {
        let (top_mode, top_running, top_enc) = match self.stack.top() {
            Some(c) => (c.mode(), c.state == CmdState::Running, c.encpos),
            None => (MoveMode::Idle, false, [0, 0]),
        };
        let tol = self.cfg.enctol;
        let mut verdict = Verdict::Idle;

        for (ax, axis) in Axis::BOTH.into_iter().enumerate() {
            self.limit_status[ax] = AxisStatus::empty();
            if matches!(verdict, Verdict::Error | Verdict::ErrorShutdown) {
                continue;
            }

            if second[ax].command != first[ax].command {
                // Trajectory still advancing.
                verdict = Verdict::Moving;
                self.poll_state.stop_ctr[ax] = 0;
            } else if (second[ax].actual - first[ax].actual).abs() < tol
                && top_running
                && matches!(top_mode, MoveMode::Slew | MoveMode::Shift)
            {
                if (second[ax].actual - top_enc[ax]).abs() > tol {
                    // Stopped short. Count polls; a slew settling in never
                    // stays put this long.
                    self.poll_state.stop_ctr[ax] += 1;
                    if self.poll_state.stop_ctr[ax] >= MAX_STOP_COUNT {
                        error!("mount off-target on {} axis", axis.name());
                        info!(
                            "actual {} -> {}, command {} -> {}, target {}",
                            first[ax].actual,
                            second[ax].actual,
                            first[ax].command,
                            second[ax].command,
                            top_enc[ax]
                        );
                        verdict = Verdict::Error;
                        self.poll_state.stop_ctr[ax] = 0;
                    }
                } else {
                    self.poll_state.stop_ctr[ax] = 0;
                }
            }

            let bits = self.poll_statbits[ax];
            if !bits.is_empty() {
                error!("error bits {:?} set on {} axis", bits, axis.name());
                if bits.contains(AxisStatus::POS_LIM) {
                    error!("positive limit bit set");
                    self.limit_status[ax].insert(AxisStatus::POS_LIM);
                    if top_mode != MoveMode::Sync {
                        verdict = Verdict::Error;
                    }
                }
                if bits.contains(AxisStatus::NEG_LIM) {
                    error!("negative limit bit set");
                    self.limit_status[ax].insert(AxisStatus::NEG_LIM);
                    if top_mode != MoveMode::Sync {
                        verdict = Verdict::Error;
                    }
                }
                if bits.contains(AxisStatus::E_STOP) {
                    error!("e-stop bit set; unrecoverable");
                    verdict = Verdict::ErrorShutdown;
                }
                if bits.contains(AxisStatus::AMP_DISABLED) {
                    error!("amplifier disabled bit set");
                    verdict = Verdict::Error;
                }
                if bits.contains(AxisStatus::BRAKE_ON) {
                    error!("brake on bit set");
                    verdict = Verdict::Error;
                }

                match self.mount.last_fault() {
                    Ok(fault) => {
                        if fault.contains("Axis 1") {
                            error!("fault reported on RA axis:");
                        } else if fault.contains("Axis 2") {
                            error!("fault reported on Dec axis:");
                        }
                        error!("{}", fault);
                        if fault.contains("High Output I^2") {
                            error!("unrecoverable fault");
                            verdict = Verdict::ErrorShutdown;
                        }
                    }
                    Err(e) => warn!("could not read fault log: {}", e),
                }
            }
        }
        Ok(verdict)
    }

    /// Poll the focus stage: motor check, paired position reads, stall
    /// classification, completion of a running focus command.
    pub(crate) fn poll_focus(&mut self) -> Result<(), FatalError> {
        match self.query_focus() {
            Ok(verdict) => {
                let completed = self
                    .stack
                    .top()
                    .map(|c| c.state == CmdState::Running && c.mode().is_focus())
                    .unwrap_or(false);
                if verdict == Verdict::Idle && completed {
                    self.stack.top_mut().unwrap().state = CmdState::Complete;
                    self.sendstat = true;
                }
                Ok(())
            }
            Err(e) => {
                warn!("focus query failed ({}); running focus recovery", e);
                self.recover_focus()
            }
        }
    }

    fn query_focus(&mut self) -> Result<Verdict, CommError> {
        let motor = self.focus.query_motor()?;
        if !self.focus.is_bypassed() && motor == 0.0 {
            error!("focus motor is off");
            return Err(CommError::MotorOff);
        }

        let p0 = self.focus.query_pos()?;
        std::thread::sleep(FOCUS_READ_PAUSE);
        let p1 = self.focus.query_pos()?;

        let verdict = if self.focus.is_bypassed() {
            Verdict::Idle
        } else {
            self.evaluate_focus(p0, p1)
        };
        self.status.foc = p1;
        Ok(verdict)
    }

    /// Stall/arrival classification for the focus stage. A sync never
    /// checks off-target: its commanded position is the reference stop.
    fn evaluate_focus(&mut self, p0: f64, p1: f64) -> Verdict {
        let delta = (p1 - p0).abs();
        let tol = self.cfg.foctol;
        let (top_mode, target) = match self.stack.top() {
            Some(c) => match c.op {
                super::MoveOp::FocusMove { target } => (c.mode(), target),
                _ => (c.mode(), 0.0),
            },
            None => (MoveMode::Idle, 0.0),
        };
        let st = &mut self.focus_poll;

        if delta > tol || st.start_ctr < st.min_start {
            // Moving, or still within its spin-up grace.
            st.start_ctr += 1;
            return Verdict::Moving;
        }

        if top_mode == MoveMode::FocusMove {
            if (p1 - target).abs() > tol {
                st.stop_ctr += 1;
                if st.stop_ctr >= MAX_STOP_COUNT {
                    error!("focus stopped at {:.3}, target was {:.3}", p1, target);
                    // The next move will take a while to get going.
                    st.min_start = 10;
                    st.stop_ctr = 0;
                    st.start_ctr = 0;
                    Verdict::Idle
                } else {
                    Verdict::Moving
                }
            } else {
                st.start_ctr = 0;
                st.stop_ctr = 0;
                st.min_start = 1;
                Verdict::Idle
            }
        } else if top_mode == MoveMode::FocusSync {
            st.start_ctr = 0;
            st.stop_ctr = 0;
            st.min_start = 1;
            Verdict::Idle
        } else {
            Verdict::Idle
        }
    }
}
