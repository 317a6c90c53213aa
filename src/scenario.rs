//! Wires a parameter set into a runnable world and drives the event loop.

use rand_seeder::{Seeder, SipRng};

use crate::cluster::dfs::{self, Dfs};
use crate::cluster::machine::{self, TaskInstance};
use crate::cluster::{Cluster, ClusterSignal, Subscriber};
use crate::computation::{self, Computation};
use crate::config::ScenarioParams;
use crate::sim::msg::{Action, Event};
use crate::sim::records::Record;
use crate::sim::{Payload, Scheduler, SimulationResult};
use crate::types::{CompId, InstanceId, MachineId, SimTime, TaskId};
use crate::utils::prelude::*;

/// All simulated state of one run.
pub(crate) struct World {
    pub(crate) cluster: Cluster,
    pub(crate) dfs: Dfs,
    pub(crate) computations: Vec<Computation>,
    /// Arena of task instances; retired in place, never removed.
    pub(crate) instances: Vec<TaskInstance>,
    pub(crate) rng: SipRng,
}

impl World {
    pub(crate) fn build(params: &ScenarioParams, sched: &mut Scheduler) -> Result<World> {
        let mut rng: SipRng = Seeder::from(params.seed.as_str()).make_rng();
        let cluster = Cluster::new(params.cluster, &mut rng);
        let dfs = Dfs::new(&cluster);
        let mut world = World {
            cluster,
            dfs,
            computations: Vec::new(),
            instances: Vec::new(),
            rng,
        };
        for comp_params in &params.computations {
            let comp = CompId(world.computations.len());
            let size = world.cluster.params.block_size * comp_params.input_split_size as u64;
            let file = dfs::write_file(&mut world, size)?;
            world
                .cluster
                .bus
                .add_listener(ClusterSignal::BusyChanged, Subscriber::Computation(comp));
            let machine_count = world.cluster.machines.len();
            world
                .computations
                .push(Computation::new(sched, *comp_params, file, machine_count));
        }
        Ok(world)
    }

    /// Simulation-start hooks, in entity execution order: machines, cluster,
    /// computations.
    fn start(&mut self, sched: &mut Scheduler) {
        for _ in &self.cluster.machines {
            sched.record_add(Record::ActiveMachines, 1);
        }
        // seed the running count so the series opens at zero
        sched.record_add(Record::RunningMachines, 0);
        for comp in 0..self.computations.len() {
            computation::start(self, sched, CompId(comp));
        }
    }

    pub(crate) fn new_instance(
        &mut self,
        machine: MachineId,
        comp: CompId,
        task: TaskId,
        end: SimTime,
    ) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(TaskInstance {
            machine,
            comp,
            task,
            end,
            running: true,
            data_rate: 0.0,
            bound_events: Vec::new(),
        });
        id
    }
}

fn route(world: &mut World, sched: &mut Scheduler, payload: Payload) -> Result<()> {
    match payload {
        Payload::Event { event, .. } => match event {
            Event::Machine(id, ev) => machine::handle_event(world, sched, id, ev),
            Event::Computation(id, ev) => computation::handle_event(world, sched, id, ev),
        },
        Payload::Action(Action::DriveRead(instance)) => {
            machine::on_drive_read(world, sched, instance)
        }
    }
}

/// A validated, runnable scenario.
pub struct Scenario {
    params: ScenarioParams,
}

impl Scenario {
    pub fn new(params: ScenarioParams) -> Result<Scenario> {
        params.validate()?;
        Ok(Scenario { params })
    }

    pub fn params(&self) -> &ScenarioParams {
        &self.params
    }

    /// Run the scenario to completion and hand back the record histories.
    /// Each call rebuilds the world from the parameters, so two runs of the
    /// same scenario produce identical results.
    pub fn run(&self) -> Result<SimulationResult> {
        let started = std::time::Instant::now();
        info!(
            machines = self.params.cluster.machine_count,
            computations = self.params.computations.len(),
            seed = %self.params.seed,
            "starting simulation"
        );

        let mut sched = Scheduler::new();
        let mut world = World::build(&self.params, &mut sched)?;
        world.start(&mut sched);
        sched.drain(|sched, payload| route(&mut world, sched, payload))?;

        let result = sched.into_result();
        info!(
            duration = %result.duration(),
            elapsed = ?started.elapsed(),
            "simulation finished"
        );
        Ok(result)
    }
}
