use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Boundary between mount and focus operation codes.
const NMOUNT: u8 = 13;

/// Flat operation discriminant shared with the upstream scheduler.
///
/// The numeric split between mount and focus codes drives completion
/// dispatch: a mount poll only completes mount operations, the focus poll
/// only focus operations.
#[derive(
    Debug,
    Eq,
    PartialEq,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum MoveMode {
    Idle = 0,
    Sync = 1,
    Slew = 2,
    Shift = 3,
    Stow = 4,
    Park = 5,
    Standby = 6,
    Track = 7,
    TrackRa = 8,
    Zeros = 9,
    Halt = 10,
    Init = 11,
    Run = 12,
    FocusOn = 14,
    FocusOff = 15,
    FocusSync = 16,
    FocusMove = 17,
    FocusQuery = 18,
    FocusZeros = 19,
    FocusInit = 20,
}

impl MoveMode {
    #[inline]
    pub fn is_mount(self) -> bool {
        (self as u8) < NMOUNT
    }

    #[inline]
    pub fn is_focus(self) -> bool {
        (self as u8) > NMOUNT
    }

    /// True for mount operations other than idle; used when deciding whether
    /// a quiet mount means the running command finished.
    #[inline]
    pub fn is_active_mount_op(self) -> bool {
        self != MoveMode::Idle && self.is_mount()
    }
}

#[derive(
    Debug,
    Eq,
    PartialEq,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(u8)]
pub enum AlarmType {
    Off = 0,
    Mount = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_focus_split() {
        assert!(MoveMode::Idle.is_mount());
        assert!(MoveMode::Run.is_mount());
        assert!(!MoveMode::Run.is_focus());
        assert!(MoveMode::FocusOn.is_focus());
        assert!(MoveMode::FocusInit.is_focus());
        assert!(!MoveMode::FocusMove.is_mount());
        assert!(!MoveMode::Idle.is_active_mount_op());
        assert!(MoveMode::Slew.is_active_mount_op());
    }

    #[test]
    fn numeric_round_trip() {
        let m = MoveMode::try_from(17u8).unwrap();
        assert_eq!(m, MoveMode::FocusMove);
        assert_eq!(u8::from(MoveMode::Zeros), 9);
        assert!(MoveMode::try_from(13u8).is_err());
    }
}
