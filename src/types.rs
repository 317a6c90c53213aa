use std::ops::{Add, AddAssign};

use parse_display::Display;
use serde::{Deserialize, Serialize};

/// A point on the simulated clock, in nanoseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{0}")]
pub struct SimTime(pub u64);

/// A span of simulated time, in nanoseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("{0}")]
pub struct SimDuration(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    /// Time elapsed since `earlier`, zero when `earlier` is in the future.
    pub fn saturating_since(self, earlier: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    pub const fn from_millis(millis: u64) -> SimDuration {
        SimDuration(millis * 1_000_000)
    }

    pub const fn from_secs(secs: u64) -> SimDuration {
        SimDuration(secs * 1_000_000_000)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Scale by a speed multiplier, truncating to whole nanoseconds.
    pub fn scaled(self, factor: f64) -> SimDuration {
        SimDuration((self.0 as f64 * factor) as u64)
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign<SimDuration> for SimTime {
    fn add_assign(&mut self, rhs: SimDuration) {
        self.0 += rhs.0;
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0 + rhs.0)
    }
}

impl AddAssign for SimDuration {
    fn add_assign(&mut self, rhs: SimDuration) {
        self.0 += rhs.0;
    }
}

/// A machine in the cluster pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("m{0}")]
pub struct MachineId(pub usize);

/// A computation running against the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("c{0}")]
pub struct CompId(pub usize);

/// A logical task within one computation; map tasks come first, reduce tasks
/// follow after the input split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("t{0}")]
pub struct TaskId(pub usize);

/// A file written to the distributed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("f{0}")]
pub struct FileId(pub usize);

/// A block index within one store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("b{0}")]
pub struct BlockId(pub usize);

/// A task instance in the world arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("i{0}")]
pub struct InstanceId(pub usize);

/// Handle to a scheduled event, usable to destroy it before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("e{0}")]
pub struct EventId(pub u64);

/// The two executor phases of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(style = "lowercase")]
pub enum Phase {
    Map,
    Reduce,
}

/// Lifecycle state of a logical task. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display(style = "lowercase")]
pub enum TaskState {
    Idle,
    Prepared,
    Running,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_arithmetic() {
        let t = SimTime(10) + SimDuration(5);
        assert_eq!(t, SimTime(15));
        assert_eq!(t.saturating_since(SimTime(12)), SimDuration(3));
        assert_eq!(t.saturating_since(SimTime(20)), SimDuration::ZERO);
    }

    #[test]
    fn duration_scaling_truncates() {
        assert_eq!(SimDuration(10).scaled(1.5), SimDuration(15));
        assert_eq!(SimDuration(10).scaled(0.25), SimDuration(2));
    }
}
