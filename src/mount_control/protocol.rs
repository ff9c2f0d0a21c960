use crate::mount_control::comm::{Port, SerialLink};
use crate::util::{Axis, AxisStatus, CommError, TestMode};
use tracing::{error, info};

/* Servo status word bit positions (site controller firmware) */
const HW_ESTOP: u16 = 1 << 0;
const HW_NEG_LIM: u16 = 1 << 1;
const HW_POS_LIM: u16 = 1 << 2;
const HW_BRAKE: u16 = 1 << 0;
const HW_AMP_DISABLED: u16 = 1 << 1;

/// Position sample from a status-1 query.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AxisSample {
    /// Where the trajectory generator currently is.
    pub command: i64,
    /// Where the encoder says the axis is.
    pub actual: i64,
}

/// Typed command set of the mount servo controller.
pub struct MountProtocol {
    link: SerialLink,
    testmode: TestMode,
}

impl MountProtocol {
    pub fn new(port: Box<dyn Port>, testmode: TestMode) -> Self {
        MountProtocol {
            link: SerialLink::new(port, "mount"),
            testmode,
        }
    }

    fn ack(&mut self, body: String) -> Result<(), CommError> {
        if self.testmode.no_mount() {
            return Ok(());
        }
        self.link.transact(&body).map(|_| ())
    }

    /// Trajectory velocity in whole counts per second (setup paths).
    pub fn set_vel_counts(&mut self, axis: Axis, counts: i64) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "VelRa",
            Axis::Dec => "VelDec",
        };
        self.ack(format!("${}, {}", key, counts))
    }

    /// Trajectory velocity in fractional counts per second (move paths).
    pub fn set_vel(&mut self, axis: Axis, counts: f64) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "VelRa",
            Axis::Dec => "VelDec",
        };
        self.ack(format!("${}, {:.6}", key, counts))
    }

    pub fn set_accel(&mut self, axis: Axis, counts: i64) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "AccelRa",
            Axis::Dec => "AccelDec",
        };
        self.ack(format!("${}, {}", key, counts))
    }

    pub fn set_max_vel(&mut self, axis: Axis, counts: i64) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "MaxVelRA",
            Axis::Dec => "MaxVelDec",
        };
        self.ack(format!("${}, {}", key, counts))
    }

    pub fn set_pos(&mut self, axis: Axis, counts: i64) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "PosRA",
            Axis::Dec => "PosDec",
        };
        self.ack(format!("${}, {}", key, counts))
    }

    pub fn halt(&mut self, axis: Axis) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "HaltRA",
            Axis::Dec => "HaltDec",
        };
        self.ack(format!("${}", key))
    }

    pub fn home(&mut self, axis: Axis) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "HomeRA",
            Axis::Dec => "HomeDec",
        };
        self.ack(format!("${}", key))
    }

    pub fn run(&mut self, axis: Axis) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "RunRA",
            Axis::Dec => "RunDec",
        };
        self.ack(format!("${}", key))
    }

    /// Stop an axis and confirm it actually released: the hold bits must
    /// all be clear afterwards.
    pub fn stop_axis(&mut self, axis: Axis) -> Result<(), CommError> {
        let key = match axis {
            Axis::Ra => "StopRA",
            Axis::Dec => "StopDec",
        };
        self.ack(format!("${}", key))?;

        let bits = self.status2(axis)?;
        if bits.contains(AxisStatus::E_STOP) {
            return Err(CommError::StopRefused {
                axis,
                reason: "e-stop",
            });
        }
        if bits.contains(AxisStatus::AMP_DISABLED) {
            return Err(CommError::StopRefused {
                axis,
                reason: "amplifier disabled",
            });
        }
        if bits.contains(AxisStatus::BRAKE_ON) {
            return Err(CommError::StopRefused {
                axis,
                reason: "brake on",
            });
        }
        Ok(())
    }

    /// Command and actual trajectory positions.
    pub fn status1(&mut self, axis: Axis) -> Result<AxisSample, CommError> {
        if self.testmode.no_mount() {
            return Ok(AxisSample::default());
        }
        let key = match axis {
            Axis::Ra => "Status1RA",
            Axis::Dec => "Status1Dec",
        };
        let resp = self.link.transact(&format!("${}", key))?;
        Ok(AxisSample {
            command: parse_field(&resp, 1)?,
            actual: parse_field(&resp, 2)?,
        })
    }

    /// Hold/limit status words, decoded to [`AxisStatus`] bits.
    pub fn status2(&mut self, axis: Axis) -> Result<AxisStatus, CommError> {
        if self.testmode.no_mount() {
            return Ok(AxisStatus::empty());
        }
        let key = match axis {
            Axis::Ra => "Status2RA",
            Axis::Dec => "Status2Dec",
        };
        let resp = self.link.transact(&format!("${}", key))?;
        let word1 = parse_hex_field(&resp, 1)?;
        let word2 = parse_hex_field(&resp, 2)?;

        let mut bits = AxisStatus::empty();
        if word1 & HW_ESTOP != 0 {
            bits.insert(AxisStatus::E_STOP);
        }
        if word1 & HW_NEG_LIM != 0 {
            bits.insert(AxisStatus::NEG_LIM);
        }
        if word1 & HW_POS_LIM != 0 {
            bits.insert(AxisStatus::POS_LIM);
        }
        if word2 & HW_BRAKE != 0 {
            bits.insert(AxisStatus::BRAKE_ON);
        }
        if word2 & HW_AMP_DISABLED != 0 {
            bits.insert(AxisStatus::AMP_DISABLED);
        }
        if !bits.is_empty() {
            info!("error bits {:?} in response [{}]", bits, resp.trim_end());
        }
        Ok(bits)
    }

    /// Drive voltage and integrator state.
    pub fn status3(&mut self, axis: Axis) -> Result<(f64, f64), CommError> {
        if self.testmode.no_mount() {
            return Ok((0.0, 0.0));
        }
        let key = match axis {
            Axis::Ra => "Status3RA",
            Axis::Dec => "Status3Dec",
        };
        let resp = self.link.transact(&format!("${}", key))?;
        Ok((parse_field(&resp, 1)?, parse_field(&resp, 2)?))
    }

    /// Free-form recent-fault log from the controller.
    pub fn last_fault(&mut self) -> Result<String, CommError> {
        if self.testmode.no_mount() {
            return Ok(String::new());
        }
        self.link.transact_fault("$RecentFaults")
    }
}

/// Typed command set of the focus stage controller.
pub struct FocusProtocol {
    link: SerialLink,
    testmode: TestMode,
}

impl FocusProtocol {
    pub fn new(port: Box<dyn Port>, testmode: TestMode) -> Self {
        FocusProtocol {
            link: SerialLink::new(port, "focus"),
            testmode,
        }
    }

    fn command(&mut self, cmd: &str) -> Result<(), CommError> {
        if self.testmode.no_focus() {
            return Ok(());
        }
        self.link.send_unframed(cmd, false).map(|_| ())
    }

    fn query(&mut self, cmd: &str) -> Result<f64, CommError> {
        if self.testmode.no_focus() {
            return Ok(0.0);
        }
        let v = self.link.send_unframed(cmd, true)?;
        v.ok_or(CommError::BadField {
            response: String::new(),
        })
    }

    pub fn motor_on(&mut self) -> Result<(), CommError> {
        self.command("1MO")
    }

    pub fn motor_off(&mut self) -> Result<(), CommError> {
        self.command("1MF")
    }

    pub fn set_pos(&mut self, target: f64) -> Result<(), CommError> {
        self.command(&format!("1PA{:.6}", target))
    }

    /// Drive to the reference stop.
    pub fn sync(&mut self) -> Result<(), CommError> {
        self.command("1PA-100")
    }

    /// Define the current position as home.
    pub fn zero(&mut self) -> Result<(), CommError> {
        self.command("1DH")
    }

    /// 1.0 when the motor is energized.
    pub fn query_motor(&mut self) -> Result<f64, CommError> {
        self.query("1MO?")
    }

    pub fn query_pos(&mut self) -> Result<f64, CommError> {
        self.query("1TP?")
    }

    pub fn is_bypassed(&self) -> bool {
        self.testmode.no_focus()
    }
}

fn parse_field<T: std::str::FromStr>(resp: &str, index: usize) -> Result<T, CommError> {
    let field = resp.split(',').nth(index).ok_or(CommError::BadField {
        response: resp.to_string(),
    })?;
    let token = field.split_whitespace().next().ok_or(CommError::BadField {
        response: resp.to_string(),
    })?;
    token.parse().map_err(|_| {
        error!("unparseable field [{}] in [{}]", token, resp.trim_end());
        CommError::BadField {
            response: resp.to_string(),
        }
    })
}

fn parse_hex_field(resp: &str, index: usize) -> Result<u16, CommError> {
    let field = resp.split(',').nth(index).ok_or(CommError::BadField {
        response: resp.to_string(),
    })?;
    let token = field.split_whitespace().next().ok_or(CommError::BadField {
        response: resp.to_string(),
    })?;
    u16::from_str_radix(token, 16).map_err(|_| {
        error!("unparseable status word [{}] in [{}]", token, resp.trim_end());
        CommError::BadField {
            response: resp.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount_control::comm::crc16;
    use crate::mount_control::comm::port::ScriptedPort;

    fn respond(body: &str) -> String {
        format!("{}{:04X}\r", body, crc16(body.as_bytes()))
    }

    fn mount_with(replies: &[&str]) -> MountProtocol {
        let mut port = ScriptedPort::new();
        for r in replies {
            port.push_reply(respond(r));
        }
        MountProtocol::new(Box::new(port), TestMode::default())
    }

    #[test]
    fn status1_extracts_command_and_actual() {
        let mut m = mount_with(&["@Status1RA, -1200, -1187, "]);
        let s = m.status1(Axis::Ra).unwrap();
        assert_eq!(s.command, -1200);
        assert_eq!(s.actual, -1187);
    }

    #[test]
    fn status2_decodes_both_words() {
        // word1: e-stop | positive limit, word2: amp disabled
        let mut m = mount_with(&["@Status2RA, 0005, 0002, "]);
        let bits = m.status2(Axis::Ra).unwrap();
        assert!(bits.contains(AxisStatus::E_STOP));
        assert!(bits.contains(AxisStatus::POS_LIM));
        assert!(bits.contains(AxisStatus::AMP_DISABLED));
        assert!(!bits.contains(AxisStatus::NEG_LIM));
        assert!(!bits.contains(AxisStatus::BRAKE_ON));
    }

    #[test]
    fn status2_clean_words_decode_empty() {
        let mut m = mount_with(&["@Status2Dec, 0000, 0000, "]);
        assert!(m.status2(Axis::Dec).unwrap().is_empty());
    }

    #[test]
    fn status3_parses_voltage_and_integrator() {
        let mut m = mount_with(&["@Status3Dec, 2.35, -0.07, "]);
        let (v, i) = m.status3(Axis::Dec).unwrap();
        assert_eq!(v, 2.35);
        assert_eq!(i, -0.07);
    }

    #[test]
    fn stop_axis_rejects_held_axis() {
        let mut m = mount_with(&["@StopRA, Ok, ", "@Status2RA, 0000, 0001, "]);
        let err = m.stop_axis(Axis::Ra).unwrap_err();
        assert!(matches!(
            err,
            CommError::StopRefused {
                axis: Axis::Ra,
                reason: "brake on"
            }
        ));
    }

    #[test]
    fn stop_axis_passes_on_clean_status() {
        let mut m = mount_with(&["@StopDec, Ok, ", "@Status2Dec, 0000, 0000, "]);
        m.stop_axis(Axis::Dec).unwrap();
    }

    #[test]
    fn test_mode_bypasses_hardware() {
        let port = ScriptedPort::new();
        let mut m = MountProtocol::new(Box::new(port), TestMode::NO_MOUNT);
        assert_eq!(m.status1(Axis::Ra).unwrap(), AxisSample::default());
        assert!(m.status2(Axis::Dec).unwrap().is_empty());
        m.set_vel_counts(Axis::Ra, 100).unwrap();
        m.halt(Axis::Dec).unwrap();
        assert_eq!(m.last_fault().unwrap(), "");
    }

    #[test]
    fn focus_bypass_answers_zero() {
        let port = ScriptedPort::new();
        let mut f = FocusProtocol::new(Box::new(port), TestMode::NO_FOCUS);
        assert_eq!(f.query_motor().unwrap(), 0.0);
        assert_eq!(f.query_pos().unwrap(), 0.0);
        f.motor_on().unwrap();
    }

    #[test]
    fn focus_commands_are_bare_strings() {
        let mut port = ScriptedPort::new();
        port.push_reply("1.0\r");
        let mut f = FocusProtocol::new(Box::new(port), TestMode::default());
        f.set_pos(27.5).unwrap();
        let on = f.query_motor().unwrap();
        assert_eq!(on, 1.0);
    }
}
