use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Decoded per-axis servo status bits.
#[derive(Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct AxisStatus(u8);

impl AxisStatus {
    pub const NEG_LIM: AxisStatus = AxisStatus(1 << 0);
    pub const POS_LIM: AxisStatus = AxisStatus(1 << 1);
    pub const E_STOP: AxisStatus = AxisStatus(1 << 2);
    pub const BRAKE_ON: AxisStatus = AxisStatus(1 << 3);
    pub const AMP_DISABLED: AxisStatus = AxisStatus(1 << 4);

    pub const fn empty() -> Self {
        AxisStatus(0)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: AxisStatus) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: AxisStatus) {
        self.0 |= other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for AxisStatus {
    type Output = AxisStatus;

    fn bitor(self, rhs: Self) -> Self {
        AxisStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for AxisStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AxisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "ok");
        }
        let names = [
            (Self::NEG_LIM, "NEG_LIM"),
            (Self::POS_LIM, "POS_LIM"),
            (Self::E_STOP, "E_STOP"),
            (Self::BRAKE_ON, "BRAKE_ON"),
            (Self::AMP_DISABLED, "AMP_DISABLED"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Mount-level state bits published to the scheduler.
#[derive(Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct StateBits(u8);

impl StateBits {
    pub const INIT: StateBits = StateBits(1 << 0);
    pub const MOVE: StateBits = StateBits(1 << 1);
    pub const ALARM: StateBits = StateBits(1 << 2);

    pub const fn empty() -> Self {
        StateBits(0)
    }

    #[inline]
    pub fn contains(self, other: StateBits) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn set(&mut self, other: StateBits) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn clear(&mut self, other: StateBits) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for StateBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateBits({:#05b})", self.0)
    }
}

/// Simulation bits: suppress I/O to hardware that is absent on the bench.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct TestMode(u8);

impl TestMode {
    pub const NO_MOUNT: TestMode = TestMode(1 << 0);
    pub const NO_FOCUS: TestMode = TestMode(1 << 1);

    pub const fn from_bits(bits: u8) -> Self {
        TestMode(bits & 0x3)
    }

    #[inline]
    pub fn no_mount(self) -> bool {
        self.0 & Self::NO_MOUNT.0 != 0
    }

    #[inline]
    pub fn no_focus(self) -> bool {
        self.0 & Self::NO_FOCUS.0 != 0
    }
}

impl BitOr for TestMode {
    type Output = TestMode;

    fn bitor(self, rhs: Self) -> Self {
        TestMode(self.0 | rhs.0)
    }
}

/// Mode flags carried on an incoming command.
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct CmdFlags(u8);

impl CmdFlags {
    pub const ALERT_MOVE: CmdFlags = CmdFlags(1 << 0);
    pub const AUTO_FOCUS: CmdFlags = CmdFlags(1 << 1);
    pub const USER_FOCUS: CmdFlags = CmdFlags(1 << 2);
    pub const OFFSET_FOCUS: CmdFlags = CmdFlags(1 << 3);
    pub const RECORD_VOLTAGE: CmdFlags = CmdFlags(1 << 4);

    pub const fn empty() -> Self {
        CmdFlags(0)
    }

    #[inline]
    pub fn contains(self, other: CmdFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn wants_focus(self) -> bool {
        self.contains(Self::AUTO_FOCUS)
            || self.contains(Self::USER_FOCUS)
            || self.contains(Self::OFFSET_FOCUS)
    }
}

impl BitOr for CmdFlags {
    type Output = CmdFlags;

    fn bitor(self, rhs: Self) -> Self {
        CmdFlags(self.0 | rhs.0)
    }
}
