//! Control daemon for a two-axis equatorial telescope mount and its focus
//! stage, both driven over serial lines.
//!
//! The library is built around [`MountEngine`], a single-threaded cooperative
//! controller that runs one loop iteration per timer tick: it advances a LIFO
//! command stack, polls both axes and the focus motor, recovers from hardware
//! faults, accepts pointing commands from an upstream scheduler, and refines
//! its pointing offsets from on-sky calibration feedback.
//!
//! The transports at the edges are injected: serial ports behind
//! [`mount_control::comm::Port`], the scheduler link behind
//! [`ipc::CommandSource`] / [`ipc::StatusSink`], calibration data behind
//! [`mount_control::calibration::CalibrationFeed`], and time behind
//! [`util::Clock`].

pub mod astro_math;
pub mod config;
pub mod coords;
pub mod ipc;
pub mod mount_control;
pub mod pointing;
pub mod util;

pub use config::MountConfig;
pub use ipc::{CommandSource, IncomingCommand, MountStatus, StatusSink};
pub use mount_control::{EngineIo, MountEngine};
pub use util::{Clock, ManualClock, SystemClock};
