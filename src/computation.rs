//! A map/reduce computation: two phase executors over one shared dispatch
//! engine, a shuffle window between them, and straggler compensation through
//! redundant task instances.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::cluster::dfs::{self, REPLICA_COUNT};
use crate::cluster::{machine, ClusterSignal, Subscriber};
use crate::config::ComputationParams;
use crate::scenario::World;
use crate::sim::msg::{Action, CompEvent, Event};
use crate::sim::records::Record;
use crate::sim::Scheduler;
use crate::types::{
    BlockId, CompId, FileId, InstanceId, MachineId, Phase, SimDuration, SimTime, TaskId, TaskState,
};
use crate::utils::prelude::*;

/// The bulk-invoke pass dispatches at most `input size / this` new tasks per
/// call, so a large input does not saturate the cluster instantaneously.
const BULK_DISPATCH_DIVISOR: usize = 3000;

/// State bookkeeping for one phase's tasks: a dense id -> state table plus
/// ordered per-state sets, with the population of every state recorded.
#[derive(Debug)]
pub struct TaskGroup {
    phase: Phase,
    start: usize,
    states: Vec<TaskState>,
    by_state: [BTreeSet<TaskId>; 4],
}

impl TaskGroup {
    fn new(sched: &mut Scheduler, phase: Phase, start: usize, count: usize) -> TaskGroup {
        let mut by_state = [BTreeSet::new(), BTreeSet::new(), BTreeSet::new(), BTreeSet::new()];
        by_state[TaskState::Idle as usize].extend((start..start + count).map(TaskId));
        sched.record_add(Record::Tasks(phase, TaskState::Idle), count as i64);
        TaskGroup {
            phase,
            start,
            states: vec![TaskState::Idle; count],
            by_state,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    fn index(&self, task: TaskId) -> usize {
        task.0 - self.start
    }

    pub fn state(&self, task: TaskId) -> TaskState {
        self.states[self.index(task)]
    }

    pub fn tasks(&self, state: TaskState) -> &BTreeSet<TaskId> {
        &self.by_state[state as usize]
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks(state).len()
    }

    /// Move `task` to `to`, but only when its current state is listed in
    /// `expected` (an empty list applies unconditionally).
    fn change_state(
        &mut self,
        sched: &mut Scheduler,
        task: TaskId,
        to: TaskState,
        expected: &[TaskState],
    ) {
        let from = self.state(task);
        if !expected.is_empty() && !expected.contains(&from) {
            return;
        }
        self.by_state[from as usize].remove(&task);
        self.by_state[to as usize].insert(task);
        let index = self.index(task);
        self.states[index] = to;
        sched.record_add(Record::Tasks(self.phase, from), -1);
        sched.record_add(Record::Tasks(self.phase, to), 1);
        trace!(phase = %self.phase, %task, %from, %to, "task state change");
    }
}

/// Dispatch and bookkeeping engine shared by both phases.
#[derive(Debug)]
pub struct TaskExecutor {
    group: TaskGroup,
    /// Base duration of one task in this phase.
    duration: SimDuration,
    /// Tasks dispatched to a machine and not yet resolved there.
    machine_tasks: BTreeMap<MachineId, BTreeSet<TaskId>>,
    /// Dispatched-but-unresolved instances per task, indexed by group offset.
    pending_instances: Vec<u32>,
    /// Live instances per task, indexed by group offset.
    running_instances: Vec<Vec<InstanceId>>,
    /// Machines with a dispatch of this executor in flight.
    pending_machines: Vec<bool>,
    /// Machines that already received this computation's function.
    assigned_function: Vec<bool>,
    last_dispatch: SimTime,
}

impl TaskExecutor {
    fn new(
        sched: &mut Scheduler,
        phase: Phase,
        start: usize,
        count: usize,
        duration: SimDuration,
        machine_count: usize,
    ) -> TaskExecutor {
        TaskExecutor {
            group: TaskGroup::new(sched, phase, start, count),
            duration,
            machine_tasks: BTreeMap::new(),
            pending_instances: vec![0; count],
            running_instances: vec![Vec::new(); count],
            pending_machines: vec![false; machine_count],
            assigned_function: vec![false; machine_count],
            last_dispatch: SimTime::ZERO,
        }
    }
}

/// One computation running against the cluster.
#[derive(Debug)]
pub struct Computation {
    params: ComputationParams,
    file: FileId,
    map: TaskExecutor,
    reduce: TaskExecutor,
    current: Phase,
    shuffle_active: bool,
}

impl Computation {
    pub(crate) fn new(
        sched: &mut Scheduler,
        params: ComputationParams,
        file: FileId,
        machine_count: usize,
    ) -> Computation {
        let map = TaskExecutor::new(
            sched,
            Phase::Map,
            0,
            params.input_split_size,
            params.map_duration,
            machine_count,
        );
        let reduce = TaskExecutor::new(
            sched,
            Phase::Reduce,
            params.input_split_size,
            params.output_split_size,
            params.reduce_duration,
            machine_count,
        );
        Computation {
            params,
            file,
            map,
            reduce,
            current: Phase::Map,
            shuffle_active: false,
        }
    }

    fn current_mut(&mut self) -> &mut TaskExecutor {
        match self.current {
            Phase::Map => &mut self.map,
            Phase::Reduce => &mut self.reduce,
        }
    }

    /// The executor owning `task`, by id range. Unlike `current_mut` this
    /// stays correct for stragglers of a finished phase.
    fn executor_for(&mut self, task: TaskId) -> &mut TaskExecutor {
        if task.0 < self.params.input_split_size {
            &mut self.map
        } else {
            &mut self.reduce
        }
    }

    fn executor_for_ref(&self, task: TaskId) -> &TaskExecutor {
        if task.0 < self.params.input_split_size {
            &self.map
        } else {
            &self.reduce
        }
    }
}

/// Simulation-start hook: subscribe to machine failures and kick off the
/// first bulk invoke.
pub(crate) fn start(world: &mut World, sched: &mut Scheduler, comp: CompId) {
    sched.schedule_event(SimDuration::ZERO, Event::Computation(comp, CompEvent::InvokeTasks));
    world
        .cluster
        .bus
        .add_listener(ClusterSignal::MachineFailed, Subscriber::Computation(comp));
}

pub(crate) fn handle_event(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    event: CompEvent,
) -> Result<()> {
    match event {
        CompEvent::ShuffleDone => {
            let c = &mut world.computations[comp.0];
            if c.shuffle_active {
                c.shuffle_active = false;
                c.current = Phase::Reduce;
                sched.record_stamp(Record::ShuffleDone);
                debug!(%comp, at = %sched.now(), "shuffle done, switching to reduce");
                sched.schedule_event(
                    SimDuration::ZERO,
                    Event::Computation(comp, CompEvent::InvokeTasks),
                );
            }
            Ok(())
        }
        CompEvent::InvokeTasks => invoke_all(world, sched, comp),
        CompEvent::TaskSucceeded { machine } => {
            let c = &mut world.computations[comp.0];
            if c.current == Phase::Map
                && !c.shuffle_active
                && c.map.group.count(TaskState::Done) == c.map.group.len()
            {
                c.shuffle_active = true;
                sched.record_stamp(Record::MappingDone);
                debug!(%comp, at = %sched.now(), "all map tasks done, shuffling");
                let shuffle = c.params.shuffle_duration;
                sched.schedule_event(shuffle, Event::Computation(comp, CompEvent::ShuffleDone));
                return Ok(());
            }
            invoke_for_machine(world, sched, comp, machine)
        }
        CompEvent::TaskFailed { machine }
        | CompEvent::NotInvoked { machine }
        | CompEvent::MachineFreed { machine } => invoke_for_machine(world, sched, comp, machine),
    }
}

/// Bulk-invoke pass over the current phase's idle tasks.
fn invoke_all(world: &mut World, sched: &mut Scheduler, comp: CompId) -> Result<()> {
    match world.computations[comp.0].current {
        Phase::Map => {
            let idle = world.computations[comp.0].map.group.tasks(TaskState::Idle).iter().copied().collect_vec();
            let cap = world.computations[comp.0].params.input_split_size / BULK_DISPATCH_DIVISOR;
            let mut started = 0;
            for task in idle {
                if launch(world, sched, comp, task)? {
                    started += 1;
                    if started == cap {
                        return Ok(());
                    }
                }
            }
            Ok(())
        }
        Phase::Reduce => reduce_invoke_all(world, sched, comp),
    }
}

fn reduce_invoke_all(world: &mut World, sched: &mut Scheduler, comp: CompId) -> Result<()> {
    let idle = world.computations[comp.0].reduce.group.tasks(TaskState::Idle).iter().copied().collect_vec();
    let threshold = world.cluster.params.compensation_threshold;
    for task in idle {
        if !launch(world, sched, comp, task)? {
            break;
        }
        if world.computations[comp.0].reduce.group.count(TaskState::Idle) < threshold {
            compensate_stragglers(world, sched, comp)?;
        }
    }
    Ok(())
}

/// Reaction to a specific machine becoming relevant (freed, failed, or a
/// dispatch resolving): the map path starts at most one of the machine's
/// locally hosted blocks, the reduce path falls back to the bulk pass. Both
/// run straggler compensation when due.
fn invoke_for_machine(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    machine: MachineId,
) -> Result<()> {
    match world.computations[comp.0].current {
        Phase::Reduce => reduce_invoke_all(world, sched, comp),
        Phase::Map => {
            let file = world.computations[comp.0].file;
            let blocks = world.cluster.machines[machine.0].drive.blocks_for_file(file).collect_vec();
            for block in blocks {
                let task = TaskId(block.0);
                if world.computations[comp.0].map.group.state(task) == TaskState::Idle
                    && launch(world, sched, comp, task)?
                {
                    break;
                }
            }
            let threshold = world.cluster.params.compensation_threshold;
            if world.computations[comp.0].map.group.count(TaskState::Idle) < threshold {
                compensate_stragglers(world, sched, comp)?;
            }
            Ok(())
        }
    }
}

/// Launch redundant instances, up to the replication factor, for every task
/// of the current phase still in flight, so one slow machine cannot gate the
/// phase.
fn compensate_stragglers(world: &mut World, sched: &mut Scheduler, comp: CompId) -> Result<()> {
    for state in [TaskState::Prepared, TaskState::Running] {
        let tasks = {
            let exec = world.computations[comp.0].current_mut();
            exec.group.tasks(state).iter().copied().collect_vec()
        };
        for task in tasks {
            loop {
                let pending = {
                    let exec = world.computations[comp.0].current_mut();
                    exec.pending_instances[exec.group.index(task)]
                };
                if pending as usize >= REPLICA_COUNT {
                    break;
                }
                if !launch(world, sched, comp, task)? {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Pick an eligible machine for one new instance of `task` under the current
/// phase's placement rule.
fn eligible_machine(world: &World, comp: CompId, task: TaskId) -> Option<MachineId> {
    let c = &world.computations[comp.0];
    match c.current {
        Phase::Map => dfs::free_machine_for_block(world, c.file, BlockId(task.0), |m| {
            !c.map.pending_machines[m.id().0]
        }),
        Phase::Reduce => world.cluster.free_machine(|m| !c.reduce.pending_machines[m.id().0]),
    }
}

/// Dispatch one new instance of `task`. Returns false when no machine is
/// eligible right now; the caller retries on a later notification.
fn launch(world: &mut World, sched: &mut Scheduler, comp: CompId, task: TaskId) -> Result<bool> {
    let machine = match eligible_machine(world, comp, task) {
        Some(machine) => machine,
        None => return Ok(false),
    };
    let now = sched.now();

    let c = &mut world.computations[comp.0];
    let params = c.params;
    let exec = c.current_mut();
    exec.group.change_state(sched, task, TaskState::Prepared, &[]);
    exec.machine_tasks.entry(machine).or_insert_with(BTreeSet::new).insert(task);

    // enforce the minimum spacing between consecutive dispatches
    let mut internal = (exec.last_dispatch + params.internal_dispatch_delay).saturating_since(now);
    let mut duration = exec.duration;
    let fresh_assignment = !exec.assigned_function[machine.0];
    if fresh_assignment {
        exec.assigned_function[machine.0] = true;
        internal += params.assign_function_delay;
        duration += params.setup_machine_delay;
    }
    exec.pending_machines[machine.0] = true;
    let index = exec.group.index(task);
    exec.pending_instances[index] += 1;
    exec.last_dispatch = now + internal;

    debug!(%comp, %task, %machine, at = %now, "dispatch task");
    machine::start_task(
        world,
        sched,
        machine,
        params.network_dispatch_delay + internal,
        duration,
        comp,
        task,
        fresh_assignment,
    )?;
    Ok(true)
}

/// A dispatched instance reached its machine. Win or lose, the dispatch is
/// concrete now: record it, mark the task running, and defer the drive read.
pub(crate) fn on_task_invoked(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    task: TaskId,
    instance: InstanceId,
) -> Result<()> {
    let c = &mut world.computations[comp.0];
    let drive_read_delay = c.params.drive_read_delay;
    let exec = c.executor_for(task);
    let index = exec.group.index(task);
    exec.running_instances[index].push(instance);
    exec.group.change_state(sched, task, TaskState::Running, &[TaskState::Prepared]);
    sched.schedule_action(drive_read_delay, Action::DriveRead(instance));
    Ok(())
}

/// The dispatch lost its race: revert the task and notify after the network
/// delay so a retry can pick another machine.
pub(crate) fn on_task_not_invoked(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    task: TaskId,
    machine: MachineId,
    fresh_assignment: bool,
) -> Result<()> {
    let c = &mut world.computations[comp.0];
    let network = c.params.network_dispatch_delay;
    let exec = c.executor_for(task);
    if fresh_assignment {
        // the function never made it onto the machine
        exec.assigned_function[machine.0] = false;
    }
    exec.group.change_state(
        sched,
        task,
        TaskState::Idle,
        &[TaskState::Prepared, TaskState::Running],
    );
    sched.schedule_event(network, Event::Computation(comp, CompEvent::NotInvoked { machine }));
    Ok(())
}

/// First success wins: the task is done, every sibling instance still running
/// elsewhere is terminated, and the success notification goes out.
pub(crate) fn on_task_success(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    task: TaskId,
    machine: MachineId,
) -> Result<()> {
    {
        let c = &mut world.computations[comp.0];
        let exec = c.executor_for(task);
        exec.group.change_state(sched, task, TaskState::Done, &[]);
    }

    let siblings = {
        let c = &world.computations[comp.0];
        let exec = c.executor_for_ref(task);
        exec.running_instances[exec.group.index(task)].clone()
    };
    for sibling in siblings {
        if world.instances[sibling.0].machine != machine {
            debug!(%task, sibling = %sibling, "terminating redundant instance");
            machine::terminate_instance(world, sched, sibling)?;
        }
    }

    let c = &mut world.computations[comp.0];
    let network = c.params.network_dispatch_delay;
    let exec = c.executor_for(task);
    if let Some(tasks) = exec.machine_tasks.get_mut(&machine) {
        tasks.remove(&task);
    }
    sched.schedule_event(network, Event::Computation(comp, CompEvent::TaskSucceeded { machine }));
    Ok(())
}

/// An instance retired (success, failure, race loss, or termination): release
/// the executor bookkeeping tied to it.
pub(crate) fn on_instance_end(
    world: &mut World,
    comp: CompId,
    task: TaskId,
    machine: MachineId,
    instance: InstanceId,
) -> Result<()> {
    let c = &mut world.computations[comp.0];
    let exec = c.executor_for(task);
    exec.pending_machines[machine.0] = false;
    let index = exec.group.index(task);
    exec.pending_instances[index] = exec.pending_instances[index].saturating_sub(1);
    exec.running_instances[index].retain(|&i| i != instance);
    Ok(())
}

/// Cluster listener: a freed machine triggers a per-machine invoke; a failed
/// machine reverts its in-flight tasks and schedules the retry notification.
pub(crate) fn on_cluster_signal(
    world: &mut World,
    sched: &mut Scheduler,
    comp: CompId,
    signal: ClusterSignal,
    machine: MachineId,
) -> Result<()> {
    match signal {
        ClusterSignal::BusyChanged => {
            if !world.cluster.machines[machine.0].is_busy() {
                let network = world.computations[comp.0].params.network_dispatch_delay;
                sched.schedule_event(
                    network,
                    Event::Computation(comp, CompEvent::MachineFreed { machine }),
                );
            }
            Ok(())
        }
        ClusterSignal::MachineFailed => {
            let c = &mut world.computations[comp.0];
            let network = c.params.network_dispatch_delay;
            let exec = c.current_mut();
            if let Some(tasks) = exec.machine_tasks.remove(&machine) {
                for task in tasks {
                    // Done stays terminal; only in-flight work falls back
                    exec.group.change_state(
                        sched,
                        task,
                        TaskState::Idle,
                        &[TaskState::Prepared, TaskState::Running],
                    );
                }
            }
            sched.schedule_event(
                network,
                Event::Computation(comp, CompEvent::TaskFailed { machine }),
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::records::RecordValue;

    fn group(sched: &mut Scheduler, count: usize) -> TaskGroup {
        TaskGroup::new(sched, Phase::Map, 0, count)
    }

    #[test]
    fn tasks_start_idle_and_population_is_recorded() {
        let mut sched = Scheduler::new();
        let group = group(&mut sched, 4);
        assert_eq!(group.count(TaskState::Idle), 4);
        assert_eq!(group.state(TaskId(2)), TaskState::Idle);
        assert_eq!(
            sched.record_value(Record::Tasks(Phase::Map, TaskState::Idle)),
            Some(RecordValue::Count(4))
        );
    }

    #[test]
    fn unconditional_transition_moves_between_sets() {
        let mut sched = Scheduler::new();
        let mut group = group(&mut sched, 2);
        group.change_state(&mut sched, TaskId(0), TaskState::Prepared, &[]);
        assert_eq!(group.state(TaskId(0)), TaskState::Prepared);
        assert_eq!(group.count(TaskState::Idle), 1);
        assert_eq!(group.count(TaskState::Prepared), 1);
        assert_eq!(
            sched.record_value(Record::Tasks(Phase::Map, TaskState::Prepared)),
            Some(RecordValue::Count(1))
        );
    }

    #[test]
    fn guarded_transition_requires_an_expected_prior_state() {
        let mut sched = Scheduler::new();
        let mut group = group(&mut sched, 1);
        // Idle task cannot jump to Running through the Prepared guard
        group.change_state(&mut sched, TaskId(0), TaskState::Running, &[TaskState::Prepared]);
        assert_eq!(group.state(TaskId(0)), TaskState::Idle);

        group.change_state(&mut sched, TaskId(0), TaskState::Prepared, &[]);
        group.change_state(&mut sched, TaskId(0), TaskState::Running, &[TaskState::Prepared]);
        assert_eq!(group.state(TaskId(0)), TaskState::Running);
    }

    #[test]
    fn done_is_not_reverted_by_the_failure_guard() {
        let mut sched = Scheduler::new();
        let mut group = group(&mut sched, 1);
        group.change_state(&mut sched, TaskId(0), TaskState::Done, &[]);
        group.change_state(
            &mut sched,
            TaskId(0),
            TaskState::Idle,
            &[TaskState::Prepared, TaskState::Running],
        );
        assert_eq!(group.state(TaskId(0)), TaskState::Done);
    }

    #[test]
    fn reduce_group_offsets_task_ids() {
        let mut sched = Scheduler::new();
        let group = TaskGroup::new(&mut sched, Phase::Reduce, 10, 3);
        assert_eq!(group.len(), 3);
        assert!(group.tasks(TaskState::Idle).contains(&TaskId(12)));
        assert_eq!(group.state(TaskId(10)), TaskState::Idle);
    }
}
