use crate::mount_control::command::{Command, MoveOp};
use crate::mount_control::MountEngine;
use crate::util::consts::{
    LIMIT_BACKOUT_DEG, LIMIT_BACKOUT_SPEED, MAX_FOCUS_RECOVERY, MAX_RECOVERY, RECOVERY_PAUSE,
};
use crate::util::{AxisStatus, CmdFlags, FatalError};
use std::fmt::Write;
use tracing::{error, info};

/// What to do about a mount error, decided from the sampled status bits
/// and the retry budget. Pure classification; the engine executes it.
#[derive(Debug)]
pub(crate) enum RecoveryPlan {
    /// Both axes report exactly an engaged limit: retreat from it slowly.
    /// Not worth alarming the operators over.
    LimitBackout { shift: Command },
    /// No bits set at all, so the slew simply missed: run it again.
    Remove { commands: Vec<Command>, mail: String },
    /// Real hold bits: halt, settle, then re-establish the mount.
    Rehome { commands: Vec<Command>, mail: String },
    Fatal { mail: String },
}

/// Classify a mount error. `commands` vectors are in push order, so the
/// last entry ends up on top of the stack.
pub(crate) fn plan_mount_recovery(
    statbits: [AxisStatus; 2],
    limit_status: [AxisStatus; 2],
    retries: u32,
    failed: &Command,
    mount_run: bool,
    established: bool,
) -> RecoveryPlan {
    let mut mail = String::new();

    let bad_slew = statbits[0] == statbits[1] && statbits[0].is_empty();
    if bad_slew {
        error!("pointing outside tolerance");
        let _ = writeln!(mail, "Pointing outside tolerance.");
    }

    let limit_only = (!limit_status[0].is_empty() || !limit_status[1].is_empty())
        && statbits[0] == limit_status[0]
        && statbits[1] == limit_status[1];

    if limit_only {
        if retries >= MAX_RECOVERY {
            error!("too many recovery retries");
            return RecoveryPlan::Fatal { mail };
        }
        let axis_backout = |bits: AxisStatus| {
            if bits.contains(AxisStatus::NEG_LIM) {
                LIMIT_BACKOUT_DEG
            } else if bits.contains(AxisStatus::POS_LIM) {
                -LIMIT_BACKOUT_DEG
            } else {
                0.0
            }
        };
        let shift = Command::new(MoveOp::Shift {
            dra: axis_backout(limit_status[0]),
            ddec: axis_backout(limit_status[1]),
            slew_spd: LIMIT_BACKOUT_SPEED,
            flags: CmdFlags::empty(),
        });
        return RecoveryPlan::LimitBackout { shift };
    }

    if bad_slew {
        if retries >= MAX_RECOVERY {
            let _ = writeln!(mail, "Too many recovery tries. Shutting down.");
            error!("too many recovery tries; re-move failed");
            return RecoveryPlan::Fatal { mail };
        }
        error!("preparing to resend move command");
        let (ra, dec) = op_radec(&failed.op);
        let mut again = failed.clone();
        again.state = crate::mount_control::CmdState::Inactive;
        return RecoveryPlan::Remove {
            commands: vec![Command::new(MoveOp::Track { ra, dec }), again],
            mail,
        };
    }

    // Hardware hold of some kind.
    let mut fatal = false;
    for (ax, bits) in statbits.iter().enumerate() {
        if bits.contains(AxisStatus::E_STOP) {
            error!("axis {} in e-stop; nothing to be done", ax);
            let _ = writeln!(mail, "Axis {} in e-stop", ax);
            fatal = true;
            continue;
        }
        if bits.contains(AxisStatus::BRAKE_ON) {
            error!("brake on axis {}", ax);
            let _ = writeln!(mail, "Brake on axis {}", ax);
        }
        if bits.contains(AxisStatus::AMP_DISABLED) {
            error!("drive amp disabled on axis {}", ax);
            let _ = writeln!(mail, "Drive amp disabled on axis {}", ax);
        }
        if bits.contains(AxisStatus::NEG_LIM) {
            error!("axis {} in negative limit", ax);
            let _ = writeln!(mail, "Axis {} in neg limit", ax);
        }
        if bits.contains(AxisStatus::POS_LIM) {
            error!("axis {} in positive limit", ax);
            let _ = writeln!(mail, "Axis {} in pos limit", ax);
        }
    }
    if fatal {
        return RecoveryPlan::Fatal { mail };
    }

    if retries >= MAX_RECOVERY {
        let _ = writeln!(mail, "Too many recovery tries. Shutting down.");
        error!("too many recovery tries; reset failed");
        return RecoveryPlan::Fatal { mail };
    }

    let commands = if !mount_run || !established {
        // No run support, or we never homed: full re-establishment.
        let zeros = Command::new(MoveOp::Zeros);
        let mut sync = Command::new(MoveOp::Sync);
        sync.nozero = true;
        vec![zeros, sync]
    } else {
        let run = Command::new(MoveOp::Run);
        let mut init = Command::new(MoveOp::Init);
        init.nozero = true;
        vec![run, init]
    };
    let _ = writeln!(mail, "Attempting to recover.");
    RecoveryPlan::Rehome { commands, mail }
}

fn op_radec(op: &MoveOp) -> (f64, f64) {
    match op {
        MoveOp::Slew { ra, dec, .. } | MoveOp::Track { ra, dec } => (*ra, *dec),
        MoveOp::Shift { dra, ddec, .. } => (*dra, *ddec),
        _ => (0.0, 0.0),
    }
}

impl MountEngine {
    /// Execute the recovery plan for the current error. Returns whether
    /// this was a quiet re-move (the published alarm can come straight
    /// back down).
    pub(crate) fn recover_mount(&mut self) -> Result<bool, FatalError> {
        let failed = self
            .stack
            .top()
            .cloned()
            .unwrap_or_else(|| Command::new(MoveOp::Idle));
        let plan = plan_mount_recovery(
            failed.statbits,
            self.limit_status,
            self.mount_retry,
            &failed,
            self.cfg.mount_run,
            self.established,
        );
        self.stack.clear();

        match plan {
            RecoveryPlan::LimitBackout { shift } => {
                info!("attempting to back out of limit");
                self.push_or_fatal(shift)?;
                self.mount_retry += 1;
                Ok(true)
            }
            RecoveryPlan::Remove { commands, mail } => {
                for c in commands {
                    self.push_or_fatal(c)?;
                }
                self.mount_retry += 1;
                self.send_mail(&mail);
                Ok(true)
            }
            RecoveryPlan::Rehome { commands, mail } => {
                // Make sure nothing is moving, give the drives a moment.
                if let Err(e) = self.dispatch_halt() {
                    error!("halt before recovery failed: {}", e);
                }
                std::thread::sleep(RECOVERY_PAUSE);
                for c in commands {
                    self.push_or_fatal(c)?;
                }
                info!("attempting to recover");
                self.mount_retry += 1;
                self.send_mail(&mail);
                Ok(false)
            }
            RecoveryPlan::Fatal { mail } => {
                self.send_mail(&mail);
                Err(FatalError::new("unrecoverable mount fault"))
            }
        }
    }

    /// Focus faults get one treatment: clear everything and restart the
    /// motor, up to the focus retry budget.
    pub(crate) fn recover_focus(&mut self) -> Result<(), FatalError> {
        self.stack.clear();
        if self.focus_retry >= MAX_FOCUS_RECOVERY {
            error!("too many focus recovery tries");
            return Err(FatalError::new("unrecoverable focus fault"));
        }
        error!("restarting focus motor");
        self.focus.motor_on().map_err(FatalError::from)?;
        self.focus_retry += 1;
        Ok(())
    }
}
