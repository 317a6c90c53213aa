//! The fixed machine pool and the listener events it publishes.

use crate::cluster::machine::Machine;
use crate::computation;
use crate::config::ClusterParams;
use crate::scenario::World;
use crate::sim::bus::Bus;
use crate::sim::Scheduler;
use crate::types::{CompId, FileId, MachineId};
use crate::utils::prelude::*;

pub mod dfs;
pub mod drive;
pub mod machine;

/// Listener events a cluster fires at the instant they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterSignal {
    BusyChanged,
    MachineFailed,
}

/// Address of a listener-bus subscriber.
#[derive(Debug, Clone, Copy)]
pub enum Subscriber {
    File(FileId),
    Computation(CompId),
}

pub struct Cluster {
    pub(crate) machines: Vec<Machine>,
    pub(crate) params: ClusterParams,
    pub(crate) bus: Bus<ClusterSignal, Subscriber>,
}

impl Cluster {
    /// Build the pool. Straggler coins are drawn here, one per machine in
    /// ascending id order.
    pub(crate) fn new(params: ClusterParams, rng: &mut rand_seeder::SipRng) -> Cluster {
        let machines = (0..params.machine_count)
            .map(|i| Machine::new(MachineId(i), &params, rng))
            .collect();
        Cluster {
            machines,
            params,
            bus: Bus::new(),
        }
    }

    pub fn machine(&self, id: MachineId) -> &Machine {
        &self.machines[id.0]
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// First alive, non-busy machine in ascending id order satisfying
    /// `condition`.
    pub fn free_machine(&self, condition: impl Fn(&Machine) -> bool) -> Option<MachineId> {
        self.machines
            .iter()
            .find(|m| m.is_alive() && !m.is_busy() && condition(m))
            .map(|m| m.id())
    }
}

/// Deliver a cluster signal to every subscriber, synchronously at the current
/// instant.
pub(crate) fn fire(
    world: &mut World,
    sched: &mut Scheduler,
    signal: ClusterSignal,
    machine: MachineId,
) -> Result<()> {
    for target in world.cluster.bus.targets(signal) {
        match target {
            Subscriber::File(file) => dfs::on_cluster_signal(world, file, signal, machine)?,
            Subscriber::Computation(comp) => {
                computation::on_cluster_signal(world, sched, comp, signal, machine)?
            }
        }
    }
    Ok(())
}
