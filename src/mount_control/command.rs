use crate::astro_math::Degrees;
use crate::ipc::IncomingCommand;
use crate::util::consts::MAX_STACK;
use crate::util::{AxisStatus, CmdFlags, MoveMode};
use tracing::warn;

/// Operation payloads. Each variant carries exactly what its dispatch
/// needs; the flat [`MoveMode`] discriminant is derived for status
/// publication and completion bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOp {
    Idle,
    Sync,
    Slew {
        ra: Degrees,
        dec: Degrees,
        slew_spd: u8,
        dectrack: f64,
        flags: CmdFlags,
    },
    Shift {
        dra: Degrees,
        ddec: Degrees,
        slew_spd: u8,
        flags: CmdFlags,
    },
    Stow,
    Park,
    Standby,
    Track {
        ra: Degrees,
        dec: Degrees,
    },
    TrackRa,
    Zeros,
    Halt,
    Init,
    Run,
    FocusOn,
    FocusOff,
    FocusSync,
    FocusMove {
        target: f64,
    },
    FocusZeros,
    FocusInit,
}

impl MoveOp {
    pub fn mode(&self) -> MoveMode {
        match self {
            MoveOp::Idle => MoveMode::Idle,
            MoveOp::Sync => MoveMode::Sync,
            MoveOp::Slew { .. } => MoveMode::Slew,
            MoveOp::Shift { .. } => MoveMode::Shift,
            MoveOp::Stow => MoveMode::Stow,
            MoveOp::Park => MoveMode::Park,
            MoveOp::Standby => MoveMode::Standby,
            MoveOp::Track { .. } => MoveMode::Track,
            MoveOp::TrackRa => MoveMode::TrackRa,
            MoveOp::Zeros => MoveMode::Zeros,
            MoveOp::Halt => MoveMode::Halt,
            MoveOp::Init => MoveMode::Init,
            MoveOp::Run => MoveMode::Run,
            MoveOp::FocusOn => MoveMode::FocusOn,
            MoveOp::FocusOff => MoveMode::FocusOff,
            MoveOp::FocusSync => MoveMode::FocusSync,
            MoveOp::FocusMove { .. } => MoveMode::FocusMove,
            MoveOp::FocusZeros => MoveMode::FocusZeros,
            MoveOp::FocusInit => MoveMode::FocusInit,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmdState {
    Inactive,
    Running,
    Complete,
}

/// One stacked operation with its lifecycle bookkeeping.
#[derive(Debug, Clone)]
pub struct Command {
    pub op: MoveOp,
    pub state: CmdState,
    /// Completion must not clear the mount-level MOVE bit (a follow-up
    /// command is still coming).
    pub nozero: bool,
    /// Working encoder target, filled in at activation.
    pub encpos: [i64; 2],
    /// Axis status bits sampled by the poller while this command ran.
    pub statbits: [AxisStatus; 2],
}

impl Command {
    pub fn new(op: MoveOp) -> Self {
        Command {
            op,
            state: CmdState::Inactive,
            nozero: false,
            encpos: [0, 0],
            statbits: [AxisStatus::empty(); 2],
        }
    }

    pub fn mode(&self) -> MoveMode {
        self.op.mode()
    }

    /// Build a stack command from a scheduler command. Query modes are not
    /// stackable; the poller runs them itself.
    pub fn from_incoming(inc: &IncomingCommand) -> Option<Command> {
        let op = match inc.move_mode {
            MoveMode::Idle => MoveOp::Idle,
            MoveMode::Sync => MoveOp::Sync,
            MoveMode::Slew => MoveOp::Slew {
                ra: inc.ra,
                dec: inc.dec,
                slew_spd: inc.slew_spd,
                dectrack: inc.dectrack,
                flags: inc.flags,
            },
            MoveMode::Shift => MoveOp::Shift {
                dra: inc.ra,
                ddec: inc.dec,
                slew_spd: inc.slew_spd,
                flags: inc.flags,
            },
            MoveMode::Stow => MoveOp::Stow,
            MoveMode::Park => MoveOp::Park,
            MoveMode::Standby => MoveOp::Standby,
            MoveMode::Track => MoveOp::Track {
                ra: inc.ra,
                dec: inc.dec,
            },
            MoveMode::TrackRa => MoveOp::TrackRa,
            MoveMode::Zeros => MoveOp::Zeros,
            MoveMode::Halt => MoveOp::Halt,
            MoveMode::Init => MoveOp::Init,
            MoveMode::Run => MoveOp::Run,
            MoveMode::FocusOn => MoveOp::FocusOn,
            MoveMode::FocusOff => MoveOp::FocusOff,
            MoveMode::FocusSync => MoveOp::FocusSync,
            MoveMode::FocusMove => MoveOp::FocusMove { target: inc.foc },
            MoveMode::FocusZeros => MoveOp::FocusZeros,
            MoveMode::FocusInit => MoveOp::FocusInit,
            MoveMode::FocusQuery => {
                warn!("focus query is not a stackable command; ignored");
                return None;
            }
        };
        Some(Command::new(op))
    }
}

/// Bounded LIFO of pending commands. The top (index 0) is the only entry
/// the engine ever activates, so at most one command is running and it is
/// always on top.
#[derive(Debug, Default)]
pub struct CommandStack {
    entries: Vec<Command>,
}

impl CommandStack {
    pub fn new() -> Self {
        CommandStack {
            entries: Vec::with_capacity(MAX_STACK),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self) -> Option<&Command> {
        self.entries.first()
    }

    pub fn top_mut(&mut self) -> Option<&mut Command> {
        self.entries.first_mut()
    }

    /// Entries from the top down.
    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.entries.iter()
    }

    /// Push onto the top. The last slot stays free for housekeeping; a
    /// full stack is an engine-fatal condition at the caller.
    pub fn push(&mut self, cmd: Command) -> Result<(), Command> {
        if self.entries.len() >= MAX_STACK - 1 {
            return Err(cmd);
        }
        self.entries.insert(0, cmd);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Command> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Invariant check used by tests: at most one running entry, on top.
    pub fn single_running_on_top(&self) -> bool {
        let running = self
            .entries
            .iter()
            .filter(|c| c.state == CmdState::Running)
            .count();
        match running {
            0 => true,
            1 => self.entries[0].state == CmdState::Running,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(op: MoveOp) -> Command {
        Command::new(op)
    }

    #[test]
    fn push_pop_is_lifo() {
        let mut stack = CommandStack::new();
        stack.push(cmd(MoveOp::Zeros)).unwrap();
        stack.push(cmd(MoveOp::Sync)).unwrap();
        assert_eq!(stack.top().unwrap().mode(), MoveMode::Sync);
        assert_eq!(stack.pop().unwrap().mode(), MoveMode::Sync);
        assert_eq!(stack.pop().unwrap().mode(), MoveMode::Zeros);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn push_refuses_when_nearly_full() {
        let mut stack = CommandStack::new();
        for _ in 0..MAX_STACK - 1 {
            stack.push(cmd(MoveOp::Idle)).unwrap();
        }
        assert!(stack.push(cmd(MoveOp::Idle)).is_err());
        assert_eq!(stack.len(), MAX_STACK - 1);
    }

    #[test]
    fn running_invariant_tracks_the_top() {
        let mut stack = CommandStack::new();
        stack.push(cmd(MoveOp::Zeros)).unwrap();
        stack.push(cmd(MoveOp::Sync)).unwrap();
        assert!(stack.single_running_on_top());
        stack.top_mut().unwrap().state = CmdState::Running;
        assert!(stack.single_running_on_top());
        // A freshly pushed command deactivates nothing by itself; the
        // engine demotes the old top before pushing.
        stack.top_mut().unwrap().state = CmdState::Inactive;
        stack.push(cmd(MoveOp::Slew {
            ra: 0.0,
            dec: 0.0,
            slew_spd: 50,
            dectrack: 0.0,
            flags: CmdFlags::empty(),
        }))
        .unwrap();
        assert!(stack.single_running_on_top());
    }

    #[test]
    fn from_incoming_carries_payload() {
        let inc = IncomingCommand {
            move_mode: MoveMode::Slew,
            ra: 123.0,
            dec: -4.5,
            foc: f64::NAN,
            slew_spd: 80,
            dectrack: 0.001,
            temp: 12.0,
            flags: CmdFlags::AUTO_FOCUS,
        };
        let c = Command::from_incoming(&inc).unwrap();
        match c.op {
            MoveOp::Slew {
                ra,
                dec,
                slew_spd,
                dectrack,
                flags,
            } => {
                assert_eq!(ra, 123.0);
                assert_eq!(dec, -4.5);
                assert_eq!(slew_spd, 80);
                assert_eq!(dectrack, 0.001);
                assert!(flags.contains(CmdFlags::AUTO_FOCUS));
            }
            _ => panic!("wrong op"),
        }
        assert_eq!(c.state, CmdState::Inactive);
    }
}
