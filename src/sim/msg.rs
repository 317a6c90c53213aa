//! The closed message surface of the simulation: everything the scheduler can
//! deliver, addressed by entity id.

use parse_display::Display;

use crate::types::{CompId, InstanceId, MachineId, SimDuration, TaskId};

/// Simulation participants addressable by scheduled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EntityId {
    #[display("{0}")]
    Machine(MachineId),
    #[display("cluster")]
    Cluster,
    #[display("{0}")]
    Computation(CompId),
}

impl EntityId {
    /// Tie-break order for same-timestamp deliveries. Machines run first,
    /// then the cluster, then computations.
    pub(crate) fn execution_order(self) -> u8 {
        match self {
            EntityId::Machine(_) => 0,
            EntityId::Cluster => 1,
            EntityId::Computation(_) => 2,
        }
    }
}

/// Events delivered to a machine.
#[derive(Debug, Clone, Display)]
pub enum MachineEvent {
    /// A dispatched task reaches the machine and tries to start.
    #[display("start {task} of {comp}")]
    Start {
        comp: CompId,
        task: TaskId,
        /// Already scaled by the machine's speed at dispatch time.
        duration: SimDuration,
        /// This dispatch was the first to assign the computation's function
        /// to the machine; rolled back when the dispatch loses its race.
        fresh_assignment: bool,
    },
    #[display("fail during {0}")]
    Fail(InstanceId),
    #[display("success of {0}")]
    Success(InstanceId),
    #[display("terminated")]
    Terminated,
}

/// Events delivered to a computation.
#[derive(Debug, Clone, Display)]
pub enum CompEvent {
    #[display("invoke tasks")]
    InvokeTasks,
    #[display("task succeeded on {machine}")]
    TaskSucceeded { machine: MachineId },
    #[display("task failed on {machine}")]
    TaskFailed { machine: MachineId },
    #[display("not invoked on {machine}")]
    NotInvoked { machine: MachineId },
    #[display("{machine} freed")]
    MachineFreed { machine: MachineId },
    #[display("shuffle done")]
    ShuffleDone,
}

/// A clock-delivered event. The target entity is part of the payload, so a
/// payload/target mismatch is unrepresentable.
#[derive(Debug, Clone, Display)]
pub enum Event {
    #[display("{0}: {1}")]
    Machine(MachineId, MachineEvent),
    #[display("{0}: {1}")]
    Computation(CompId, CompEvent),
}

impl Event {
    pub fn target(&self) -> EntityId {
        match self {
            Event::Machine(id, _) => EntityId::Machine(*id),
            Event::Computation(id, _) => EntityId::Computation(*id),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Machine(_, ev) => match ev {
                MachineEvent::Start { .. } => EventKind::TaskStart,
                MachineEvent::Fail(_) => EventKind::MachineFail,
                MachineEvent::Success(_) => EventKind::TaskSuccess,
                MachineEvent::Terminated => EventKind::TaskTerminated,
            },
            Event::Computation(_, ev) => match ev {
                CompEvent::InvokeTasks => EventKind::InvokeTasks,
                CompEvent::TaskSucceeded { .. } => EventKind::TaskSucceeded,
                CompEvent::TaskFailed { .. } => EventKind::TaskFailed,
                CompEvent::NotInvoked { .. } => EventKind::NotInvoked,
                CompEvent::MachineFreed { .. } => EventKind::MachineFreed,
                CompEvent::ShuffleDone => EventKind::ShuffleDone,
            },
        }
    }
}

/// Type tags used by the pending-event counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum EventKind {
    TaskStart,
    MachineFail,
    TaskSuccess,
    TaskTerminated,
    InvokeTasks,
    TaskSucceeded,
    TaskFailed,
    NotInvoked,
    MachineFreed,
    ShuffleDone,
}

/// A bare deferred callback. Actions cannot be destroyed and always execute.
#[derive(Debug, Clone, Display)]
pub enum Action {
    /// Charge a block read against a running task instance.
    #[display("drive read for {0}")]
    DriveRead(InstanceId),
}
