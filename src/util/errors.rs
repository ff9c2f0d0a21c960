use crate::util::Axis;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Errors from the framed serial layer. All of these are retried locally;
/// one surfacing here means the retry budget is spent.
#[derive(Debug)]
pub enum CommError {
    /// Nothing (or only a partial line) arrived before the deadline.
    Timeout { partial: String },
    /// The response filled the buffer without a terminator.
    Unterminated { partial: String },
    BadCrc { response: String },
    EchoMismatch { command: String, response: String },
    /// A response arrived but a field would not parse.
    BadField { response: String },
    /// The focus motor reported itself off when queried.
    MotorOff,
    /// An axis refused to come out of hold after a stop command.
    StopRefused { axis: Axis, reason: &'static str },
    Io(std::io::Error),
}

impl Display for CommError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommError::Timeout { partial } => {
                write!(f, "timeout on serial read (read [{}])", partial)
            }
            CommError::Unterminated { partial } => {
                write!(f, "no termination character in response (read [{}])", partial)
            }
            CommError::BadCrc { response } => write!(f, "bad CRC on response [{}]", response),
            CommError::EchoMismatch { command, response } => {
                write!(f, "command [{}] echoed [{}]", command, response)
            }
            CommError::BadField { response } => {
                write!(f, "unparseable field in response [{}]", response)
            }
            CommError::MotorOff => write!(f, "focus motor is off"),
            CommError::StopRefused { axis, reason } => {
                write!(f, "{} bit set, unable to stop {} axis", reason, axis.name())
            }
            CommError::Io(e) => write!(f, "serial I/O error: {}", e),
        }
    }
}

impl Error for CommError {}

impl From<std::io::Error> for CommError {
    fn from(e: std::io::Error) -> Self {
        CommError::Io(e)
    }
}

/// Why a motion command was refused before anything reached the hardware.
#[derive(Debug)]
pub enum MotionError {
    OutOfRange { axis: Axis, target: i64 },
    Comm(CommError),
}

impl Display for MotionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::OutOfRange { axis, target } => {
                write!(f, "{} position {} out of range", axis.name(), target)
            }
            MotionError::Comm(e) => write!(f, "{}", e),
        }
    }
}

impl Error for MotionError {}

impl From<CommError> for MotionError {
    fn from(e: CommError) -> Self {
        MotionError::Comm(e)
    }
}

/// Configuration load or validation failure; the daemon refuses to start.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, error: std::io::Error },
    Parse { path: String, line: usize, message: String },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => write!(f, "could not read {}: {}", path, error),
            ConfigError::Parse { path, line, message } => {
                write!(f, "{}:{}: {}", path, line, message)
            }
            ConfigError::Invalid(message) => write!(f, "invalid configuration: {}", message),
        }
    }
}

impl Error for ConfigError {}

/// A calibration or focus feed could not deliver this cycle. Never fatal;
/// the cycle is skipped and retried later.
#[derive(Debug)]
pub struct FeedError(pub String);

impl Display for FeedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for FeedError {}

/// The scheduler link failed outright (as opposed to merely being busy).
#[derive(Debug)]
pub struct IpcError(pub String);

impl Display for IpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for IpcError {}

/// Unrecoverable condition: the daemon parks what it can and exits 1.
#[derive(Debug)]
pub struct FatalError(pub String);

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        FatalError(message.into())
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for FatalError {}

impl From<IpcError> for FatalError {
    fn from(e: IpcError) -> Self {
        FatalError(format!("scheduler link failed: {}", e))
    }
}

impl From<CommError> for FatalError {
    fn from(e: CommError) -> Self {
        FatalError(format!("serial link failed: {}", e))
    }
}
