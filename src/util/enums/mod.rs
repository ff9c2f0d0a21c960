pub mod axis;
pub mod move_mode;
pub mod status_bits;

pub use axis::*;
pub use move_mode::*;
pub use status_bits::*;

pub use crate::astro_math::{Degrees, Radians};
