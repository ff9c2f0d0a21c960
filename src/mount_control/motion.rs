use crate::mount_control::command::Command;
use crate::mount_control::protocol::AxisSample;
use crate::mount_control::MountEngine;
use crate::util::{Axis, CommError, MotionError, StateBits};
use tracing::{debug, error, info};

impl MountEngine {
    /// Trajectory samples for both axes.
    pub(crate) fn sample_axes(&mut self) -> Result<[AxisSample; 2], CommError> {
        Ok([
            self.mount.status1(Axis::Ra)?,
            self.mount.status1(Axis::Dec)?,
        ])
    }

    /// Bring both axes up: velocities zeroed, accelerations and velocity
    /// ceilings configured, axes halted then stopped (which energizes the
    /// amplifiers), focus motor on.
    pub(crate) fn init_mount(&mut self) -> Result<(), CommError> {
        for axis in Axis::BOTH {
            self.mount.set_vel_counts(axis, 0)?;
        }
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            let accel = (self.cfg.slw_acc[i] * self.cfg.deg2enc[i]) as i64;
            self.mount.set_accel(axis, accel)?;
        }
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            let ceiling =
                (self.cfg.overspeed * self.cfg.max_vel[i] * self.cfg.deg2enc[i]) as i64;
            self.mount.set_max_vel(axis, ceiling)?;
        }
        for axis in Axis::BOTH {
            self.mount.halt(axis)?;
        }
        for axis in Axis::BOTH {
            self.mount.stop_axis(axis)?;
        }
        self.focus.motor_on()?;
        self.status.slew_spd = 0.0;
        self.status.trk_spd = 0.0;
        Ok(())
    }

    /// Command a position-and-velocity move. The target must sit inside
    /// the configured travel (zero point and pointing offset included) or
    /// nothing is sent at all.
    pub(crate) fn move_to(
        &mut self,
        pos: [i64; 2],
        vel: [f64; 2],
        stop_first: bool,
    ) -> Result<(), MotionError> {
        if stop_first {
            self.mount.set_vel_counts(Axis::Ra, 0)?;
            self.mount.set_vel_counts(Axis::Dec, 0)?;
        }

        let mut violation = None;
        for (i, axis) in Axis::BOTH.into_iter().enumerate() {
            let (lo, hi) = self.cfg.enc_limits(i);
            if pos[i] < lo || pos[i] > hi {
                error!("{} position out of range", axis.name());
                violation.get_or_insert(MotionError::OutOfRange {
                    axis,
                    target: pos[i],
                });
            }
        }
        if let Some(err) = violation {
            return Err(err);
        }

        debug!("sending mount to {}, {}", pos[0], pos[1]);
        self.mount.set_pos(Axis::Ra, pos[0])?;
        self.mount.set_pos(Axis::Dec, pos[1])?;
        info!("setting speed to {:.6}, {:.6}", vel[0], vel[1]);
        self.mount.set_vel(Axis::Ra, vel[0])?;
        self.mount.set_vel(Axis::Dec, vel[1])?;
        Ok(())
    }

    /// A rejected target cancels the move: restore the previous commanded
    /// coordinates, retarget the current position, and zero the
    /// velocities so nothing drifts.
    pub(crate) fn cancel_move(
        &mut self,
        cmd: &mut Command,
        old_ra: f64,
        old_dec: f64,
    ) -> Result<(), CommError> {
        info!(
            "illegal ra/dec ({:.2}, {:.2}); cancelling move",
            self.status.ra, self.status.dec
        );
        self.status.state.clear(StateBits::MOVE);
        self.status.ra = old_ra;
        self.status.dec = old_dec;

        let s = self.sample_axes()?;
        cmd.encpos = [s[0].command, s[1].command];
        if let Err(e) = self.move_to(cmd.encpos, [0.0, 0.0], true) {
            info!("error cancelling move: {}", e);
        }
        Ok(())
    }
}
