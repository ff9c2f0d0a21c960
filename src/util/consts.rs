#![allow(unused)]
use std::time::Duration;

/// Total attempts for one framed exchange before the link is declared dead.
pub const MAX_TRY: u32 = 3;
/// Longest response either controller produces.
pub const RESP_LEN: usize = 1000;
pub const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);
/// The fault log takes longer to come back than ordinary acks.
pub const FAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Command stack capacity; the last slot is kept free for housekeeping.
pub const MAX_STACK: usize = 30;
pub const MAX_RECOVERY: u32 = 4;
pub const MAX_FOCUS_RECOVERY: u32 = 3;
/// Consecutive stopped-off-target polls before an axis is declared in error.
pub const MAX_STOP_COUNT: u32 = 3;
/// Consecutive undrained status reports before the scheduler is declared gone.
pub const PEER_TIMEOUT: u32 = 3;

/// Seconds between pointing-offset update checks.
pub const OFFSET_DELAY: f64 = 120.0;
/// Seconds between focus-model update checks.
pub const FOCUS_OFFSET_DELAY: f64 = 300.0;
/// Largest single pointing-offset update, degrees of axis motion.
pub const MAX_OFFSET_DEG: f64 = 1.0;

/// Percent of max velocity used for the standby move.
pub const STANDBY_SPEED: f64 = 50.0;
pub const LIMIT_BACKOUT_DEG: f64 = 2.0;
pub const LIMIT_BACKOUT_SPEED: u8 = 10;

/// Degrees per second at the sidereal rate.
pub const SIDEREAL_RATE: f64 = 360.0 / 86636.55;

/// Seconds of look-ahead used to derive tracking velocity during a slew.
pub const TRACK_LOOKAHEAD: f64 = 60.0;
/// Axis excursion over the look-ahead that marks a target untrackable, degrees.
pub const TRACK_LIMIT_DEG: f64 = 10.0;

/// Settle time after halting before a recovery sequence is pushed.
pub const RECOVERY_PAUSE: Duration = Duration::from_secs(3);
/// Pause between the paired focus position reads.
pub const FOCUS_READ_PAUSE: Duration = Duration::from_millis(50);
