//! One simulated worker machine: busy/alive state, task dispatch with speed
//! scaling and failure coin-flips, and the task instances that run on it.

use rand::Rng;
use thiserror::Error;

use crate::cluster::drive::Drive;
use crate::cluster::{self, ClusterSignal};
use crate::computation;
use crate::config::ClusterParams;
use crate::scenario::World;
use crate::sim::msg::{Event, MachineEvent};
use crate::sim::records::Record;
use crate::sim::Scheduler;
use crate::types::{CompId, EventId, InstanceId, MachineId, SimDuration, SimTime, TaskId};
use crate::utils::prelude::*;

/// Driving a machine outside its state machine is a programming error.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("machine {0} is not alive anymore")]
    MachineDead(MachineId),
    #[error("machine {0} is busy")]
    MachineBusy(MachineId),
}

#[derive(Debug)]
pub struct Machine {
    id: MachineId,
    /// Effective duration multiplier; straggler slowdown is folded in here.
    speed: f64,
    straggler: bool,
    pub(crate) alive: bool,
    pub(crate) busy: bool,
    pub(crate) drive: Drive,
}

impl Machine {
    pub(crate) fn new(id: MachineId, params: &ClusterParams, rng: &mut rand_seeder::SipRng) -> Machine {
        let straggler = rng.gen_bool(params.straggler_probability);
        let mut speed = params.computation_speed;
        if straggler {
            speed *= params.straggler_slowdown;
        }
        Machine {
            id,
            speed,
            straggler,
            alive: true,
            busy: false,
            drive: Drive::new(params.drive_capacity),
        }
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_straggler(&self) -> bool {
        self.straggler
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }
}

/// A task racing to execute (or executing) on one machine. Instances live in
/// the world arena and are retired in place, never removed.
#[derive(Debug)]
pub struct TaskInstance {
    pub(crate) machine: MachineId,
    pub(crate) comp: CompId,
    pub(crate) task: TaskId,
    pub(crate) end: SimTime,
    pub(crate) running: bool,
    /// Registered share of the global data-transfer gauge, removed when the
    /// instance ends.
    pub(crate) data_rate: f64,
    /// Future events resolving this instance; destroyed on termination.
    pub(crate) bound_events: Vec<EventId>,
}

impl TaskInstance {
    pub(crate) fn remaining(&self, now: SimTime) -> SimDuration {
        self.end.saturating_since(now)
    }
}

/// Dispatch a task to this machine. The outcome is decided at the invocation
/// instant, `network_delay` from now. Errors when the machine is dead or
/// already busy at dispatch time.
pub(crate) fn start_task(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    network_delay: SimDuration,
    duration: SimDuration,
    comp: CompId,
    task: TaskId,
    fresh_assignment: bool,
) -> Result<()> {
    let machine = &world.cluster.machines[id.0];
    if !machine.alive {
        return Err(ClusterError::MachineDead(id).into());
    }
    if machine.busy {
        return Err(ClusterError::MachineBusy(id).into());
    }
    let duration = duration.scaled(machine.speed);
    sched.schedule_event(
        network_delay,
        Event::Machine(id, MachineEvent::Start { comp, task, duration, fresh_assignment }),
    );
    Ok(())
}

pub(crate) fn handle_event(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    event: MachineEvent,
) -> Result<()> {
    match event {
        MachineEvent::Start { comp, task, duration, fresh_assignment } => {
            on_start(world, sched, id, comp, task, duration, fresh_assignment)
        }
        MachineEvent::Fail(instance) => on_fail(world, sched, id, instance),
        MachineEvent::Success(instance) => on_success(world, sched, id, instance),
        MachineEvent::Terminated => on_terminated(world, sched, id),
    }
}

fn on_start(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    comp: CompId,
    task: TaskId,
    duration: SimDuration,
    fresh_assignment: bool,
) -> Result<()> {
    // the coin is flipped before the race is resolved
    let fail_probability = world.cluster.params.machine_fail_probability;
    let fail = world.rng.gen_bool(fail_probability);

    let end = sched.now() + duration;
    let instance = world.new_instance(id, comp, task, end);
    computation::on_task_invoked(world, sched, comp, task, instance)?;

    if world.cluster.machines[id.0].busy {
        debug!(machine = %id, %task, "dispatch lost its race, machine already busy");
        computation::on_task_not_invoked(world, sched, comp, task, id, fresh_assignment)?;
        return end_instance(world, sched, instance);
    }

    set_busy(world, sched, id, true)?;
    sched.record_add(Record::RunningMachines, 1);
    if world.cluster.machines[id.0].straggler {
        sched.record_add(Record::RunningStragglers, 1);
    }

    if fail {
        let until_failure = if duration.is_zero() {
            SimDuration::ZERO
        } else {
            SimDuration(world.rng.gen_range(0..duration.0))
        };
        let ev = sched.schedule_event(until_failure, Event::Machine(id, MachineEvent::Fail(instance)));
        world.instances[instance.0].bound_events.push(ev);
    } else {
        let ev = sched.schedule_event(duration, Event::Machine(id, MachineEvent::Success(instance)));
        world.instances[instance.0].bound_events.push(ev);
    }
    Ok(())
}

fn on_success(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    instance: InstanceId,
) -> Result<()> {
    sched.record_add(Record::RunningMachines, -1);
    if world.cluster.machines[id.0].straggler {
        sched.record_add(Record::RunningStragglers, -1);
    }
    set_busy(world, sched, id, false)?;
    let (comp, task) = {
        let inst = &world.instances[instance.0];
        (inst.comp, inst.task)
    };
    computation::on_task_success(world, sched, comp, task, id)?;
    end_instance(world, sched, instance)
}

fn on_fail(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    instance: InstanceId,
) -> Result<()> {
    world.cluster.machines[id.0].alive = false;
    info!(machine = %id, at = %sched.now(), "machine failed");
    // store re-replication and executor reverts run now, at this instant
    cluster::fire(world, sched, ClusterSignal::MachineFailed, id)?;
    sched.record_add(Record::FailedMachines, 1);
    sched.record_add(Record::RunningMachines, -1);
    if world.cluster.machines[id.0].straggler {
        sched.record_add(Record::RunningStragglers, -1);
    }
    sched.record_add(Record::ActiveMachines, -1);
    end_instance(world, sched, instance)
}

fn on_terminated(world: &mut World, sched: &mut Scheduler, id: MachineId) -> Result<()> {
    sched.record_add(Record::RunningMachines, -1);
    if world.cluster.machines[id.0].straggler {
        sched.record_add(Record::RunningStragglers, -1);
    }
    set_busy(world, sched, id, false)
}

pub(crate) fn set_busy(
    world: &mut World,
    sched: &mut Scheduler,
    id: MachineId,
    busy: bool,
) -> Result<()> {
    world.cluster.machines[id.0].busy = busy;
    cluster::fire(world, sched, ClusterSignal::BusyChanged, id)
}

/// Retire an instance: drop its data-rate share and release the executor's
/// bookkeeping. Idempotent.
pub(crate) fn end_instance(
    world: &mut World,
    sched: &mut Scheduler,
    instance: InstanceId,
) -> Result<()> {
    let inst = &mut world.instances[instance.0];
    if !inst.running {
        return Ok(());
    }
    inst.running = false;
    let (rate, comp, task, machine) = (inst.data_rate, inst.comp, inst.task, inst.machine);
    sched.gauge_add(Record::DataTransfer, -rate);
    computation::on_instance_end(world, comp, task, machine, instance)
}

/// End a redundant instance immediately: its bound future events are
/// destroyed and a zero-delay terminated event frees the machine.
pub(crate) fn terminate_instance(
    world: &mut World,
    sched: &mut Scheduler,
    instance: InstanceId,
) -> Result<()> {
    end_instance(world, sched, instance)?;
    let machine = world.instances[instance.0].machine;
    let bound: Vec<EventId> = world.instances[instance.0].bound_events.clone();
    for event in bound {
        sched.destroy(event);
    }
    sched.schedule_event(SimDuration::ZERO, Event::Machine(machine, MachineEvent::Terminated));
    Ok(())
}

/// Deferred drive read: charges a block-sized transfer, spread over the
/// instance's remaining time, against the global gauge.
pub(crate) fn on_drive_read(
    world: &mut World,
    sched: &mut Scheduler,
    instance: InstanceId,
) -> Result<()> {
    let now = sched.now();
    let block_size = world.cluster.params.block_size;
    let inst = &mut world.instances[instance.0];
    if !inst.running {
        return Ok(());
    }
    let remaining = inst.remaining(now);
    if remaining.is_zero() {
        return Ok(());
    }
    let rate = block_size as f64 / remaining.0 as f64;
    inst.data_rate += rate;
    sched.gauge_add(Record::DataTransfer, rate);
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand_seeder::Seeder;

    use super::*;

    fn rng() -> rand_seeder::SipRng {
        Seeder::from("machine tests").make_rng()
    }

    #[test]
    fn straggler_slowdown_is_folded_into_speed() {
        let params = ClusterParams {
            straggler_probability: 1.0,
            straggler_slowdown: 5.0,
            computation_speed: 2.0,
            ..ClusterParams::default()
        };
        let machine = Machine::new(MachineId(0), &params, &mut rng());
        assert!(machine.is_straggler());
        assert!((machine.speed - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn non_straggler_keeps_base_speed() {
        let params = ClusterParams {
            straggler_probability: 0.0,
            straggler_slowdown: 5.0,
            ..ClusterParams::default()
        };
        let machine = Machine::new(MachineId(3), &params, &mut rng());
        assert!(!machine.is_straggler());
        assert!((machine.speed - 1.0).abs() < f64::EPSILON);
        assert!(machine.is_alive());
        assert!(!machine.is_busy());
    }
}
