use serde::{Deserialize, Serialize};

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    Ra = 0,
    Dec = 1,
}

impl Axis {
    pub const BOTH: [Axis; 2] = [Axis::Ra, Axis::Dec];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Ra => "RA",
            Axis::Dec => "Dec",
        }
    }
}
