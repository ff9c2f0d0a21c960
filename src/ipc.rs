use crate::util::{AlarmType, CmdFlags, IpcError, MoveMode, StateBits};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

/// One pointing command from the upstream scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCommand {
    pub move_mode: MoveMode,
    /// J2000 degrees.
    #[serde(default)]
    pub ra: f64,
    #[serde(default)]
    pub dec: f64,
    /// Focus target (or offset, with `OFFSET_FOCUS`).
    #[serde(default = "nan")]
    pub foc: f64,
    /// Percent of max velocity, 0-100.
    #[serde(default)]
    pub slew_spd: u8,
    /// Extra declination tracking rate, degrees per second.
    #[serde(default)]
    pub dectrack: f64,
    /// Ambient temperature for the focus model.
    #[serde(default)]
    pub temp: f64,
    #[serde(default)]
    pub flags: CmdFlags,
}

fn nan() -> f64 {
    f64::NAN
}

/// Published mount state, one record per sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountStatus {
    pub state: StateBits,
    pub move_mode: MoveMode,
    pub alarm_type: AlarmType,
    /// Zero-point-relative encoder positions.
    pub encpos: [i64; 2],
    /// Apparent coordinates of the encoder position, degrees.
    pub enc_ra: f64,
    pub enc_dec: f64,
    /// Commanded target, degrees.
    pub ra: f64,
    pub dec: f64,
    /// Axis drive voltages.
    pub v_ra: f64,
    pub v_dec: f64,
    pub foc: f64,
    /// Encoder counts per second.
    pub slew_spd: f64,
    pub trk_spd: f64,
    /// When this record was published.
    pub tlast_mjd: f64,
}

impl Default for MountStatus {
    fn default() -> Self {
        MountStatus {
            state: StateBits::empty(),
            move_mode: MoveMode::Idle,
            alarm_type: AlarmType::Off,
            encpos: [0, 0],
            enc_ra: 0.0,
            enc_dec: 0.0,
            ra: 0.0,
            dec: 0.0,
            v_ra: 0.0,
            v_dec: 0.0,
            foc: 0.0,
            slew_spd: 0.0,
            trk_spd: 0.0,
            tlast_mjd: 0.0,
        }
    }
}

/// Inbound half of the scheduler link. `try_recv` never blocks; the engine
/// calls it once per tick. `acknowledge` completes the request/response
/// handshake after a command has been taken onto the stack.
pub trait CommandSource: Send {
    fn try_recv(&mut self) -> Result<Option<IncomingCommand>, IpcError>;
    fn acknowledge(&mut self) -> Result<(), IpcError>;
}

/// Outbound half of the scheduler link. `publish` returns `Ok(false)` when
/// the consumer has not drained the previous record; the engine counts
/// consecutive refusals and gives up after a limit.
pub trait StatusSink: Send {
    fn publish(&mut self, status: &MountStatus) -> Result<bool, IpcError>;
}

/// In-process command source over a channel, for embedding and tests.
pub struct ChannelCommandSource {
    rx: mpsc::Receiver<IncomingCommand>,
}

impl ChannelCommandSource {
    pub fn new() -> (mpsc::Sender<IncomingCommand>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, ChannelCommandSource { rx })
    }
}

impl CommandSource for ChannelCommandSource {
    fn try_recv(&mut self) -> Result<Option<IncomingCommand>, IpcError> {
        match self.rx.try_recv() {
            Ok(cmd) => Ok(Some(cmd)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                Err(IpcError("command source disconnected".into()))
            }
        }
    }

    fn acknowledge(&mut self) -> Result<(), IpcError> {
        Ok(())
    }
}

/// In-process status sink over a channel; never refuses a record.
pub struct ChannelStatusSink {
    tx: mpsc::Sender<MountStatus>,
}

impl ChannelStatusSink {
    pub fn new() -> (Self, mpsc::Receiver<MountStatus>) {
        let (tx, rx) = mpsc::channel();
        (ChannelStatusSink { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish(&mut self, status: &MountStatus) -> Result<bool, IpcError> {
        self.tx
            .send(status.clone())
            .map_err(|_| IpcError("status sink disconnected".into()))?;
        Ok(true)
    }
}
