//! The block-replicated distributed store. Blocks are placed on the
//! least-used drives and reactively re-replicated when a machine fails.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::cluster::drive::DriveFull;
use crate::cluster::machine::Machine;
use crate::cluster::{Cluster, ClusterSignal, Subscriber};
use crate::scenario::World;
use crate::types::{BlockId, FileId, MachineId};
use crate::utils::prelude::*;

/// Replication factor of every block.
pub const REPLICA_COUNT: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("placing {block} of {file} on {machine}: {source}")]
    Placement {
        file: FileId,
        block: BlockId,
        machine: MachineId,
        #[source]
        source: DriveFull,
    },
    #[error("no machine available to host blocks")]
    NoMachines,
}

/// The store: alive machines ranked by drive usage, plus the files written so
/// far.
#[derive(Debug)]
pub struct Dfs {
    /// Re-keyed on every placement, so the head is always the currently
    /// least-used machine; ties break by machine id.
    ranking: BTreeSet<(u64, MachineId)>,
    files: Vec<StoreFile>,
}

/// One logical file split into fixed-size, replicated blocks.
#[derive(Debug)]
pub struct StoreFile {
    id: FileId,
    block_size: u64,
    /// Replica machines per block, in placement order.
    blocks: Vec<Vec<MachineId>>,
}

impl StoreFile {
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn replicas(&self, block: BlockId) -> &[MachineId] {
        &self.blocks[block.0]
    }
}

impl Dfs {
    pub(crate) fn new(cluster: &Cluster) -> Dfs {
        let ranking = cluster.machines().iter().map(|m| (0, m.id())).collect();
        Dfs { ranking, files: Vec::new() }
    }

    pub fn file(&self, id: FileId) -> &StoreFile {
        &self.files[id.0]
    }

    pub fn files(&self) -> &[StoreFile] {
        &self.files
    }
}

/// Split `size` bytes into blocks and place each on the least-used drives.
/// The file subscribes to machine failures for re-replication.
pub(crate) fn write_file(world: &mut World, size: u64) -> Result<FileId> {
    let block_size = world.cluster.params.block_size;
    let block_count = (size / block_size + if size % block_size != 0 { 1 } else { 0 }) as usize;
    let id = FileId(world.dfs.files.len());
    let mut blocks = Vec::with_capacity(block_count);
    for index in 0..block_count {
        blocks.push(place_block(world, id, BlockId(index), block_size)?);
    }
    world.dfs.files.push(StoreFile { id, block_size, blocks });
    world.cluster.bus.add_listener(ClusterSignal::MachineFailed, Subscriber::File(id));
    debug!(file = %id, blocks = block_count, "wrote file to store");
    Ok(id)
}

/// Draw up to `REPLICA_COUNT` machines off the top of the usage ranking.
/// Drawn machines stay out until the block is fully placed, which keeps the
/// replica set distinct; they re-enter with their updated usage.
fn place_block(
    world: &mut World,
    file: FileId,
    block: BlockId,
    block_size: u64,
) -> Result<Vec<MachineId>> {
    if world.dfs.ranking.is_empty() {
        return Err(StoreError::NoMachines.into());
    }
    let mut replicas = Vec::new();
    for _ in 0..REPLICA_COUNT {
        let (usage, machine) = match world.dfs.ranking.iter().next() {
            Some(&entry) => entry,
            None => break,
        };
        world.dfs.ranking.remove(&(usage, machine));
        world.cluster.machines[machine.0]
            .drive
            .add_block(file, block, block_size)
            .map_err(|source| StoreError::Placement { file, block, machine, source })?;
        replicas.push(machine);
    }
    for &machine in &replicas {
        let usage = world.cluster.machines[machine.0].drive.used();
        world.dfs.ranking.insert((usage, machine));
    }
    Ok(replicas)
}

/// First replica of `block` (in placement order) that is alive, not busy, and
/// passes `condition`.
pub(crate) fn free_machine_for_block(
    world: &World,
    file: FileId,
    block: BlockId,
    condition: impl Fn(&Machine) -> bool,
) -> Option<MachineId> {
    world.dfs.files[file.0].blocks[block.0]
        .iter()
        .copied()
        .find(|&id| {
            let machine = &world.cluster.machines[id.0];
            machine.is_alive() && !machine.is_busy() && condition(machine)
        })
}

/// Machine-failure listener: drop the machine from the ranking and replace
/// every replica it hosted, synchronously at the failure instant.
pub(crate) fn on_cluster_signal(
    world: &mut World,
    file: FileId,
    signal: ClusterSignal,
    machine: MachineId,
) -> Result<()> {
    if signal != ClusterSignal::MachineFailed {
        return Ok(());
    }
    let usage = world.cluster.machines[machine.0].drive.used();
    world.dfs.ranking.remove(&(usage, machine));
    re_replicate(world, file, machine)
}

fn re_replicate(world: &mut World, file: FileId, failed: MachineId) -> Result<()> {
    let block_count = world.dfs.files[file.0].blocks.len();
    let block_size = world.dfs.files[file.0].block_size;
    for index in 0..block_count {
        let block = BlockId(index);
        let slot = match world.dfs.files[file.0].blocks[index].iter().position(|&m| m == failed) {
            Some(slot) => slot,
            None => continue,
        };
        match replacement_for(world, file, block, block_size)? {
            Some(machine) => {
                debug!(%file, %block, from = %failed, to = %machine, "moved replica");
                world.dfs.files[file.0].blocks[index][slot] = machine;
            }
            None => {
                // fewer alive machines than replicas wanted; shrink instead
                // of doubling up on a host
                world.dfs.files[file.0].blocks[index].remove(slot);
            }
        }
    }
    Ok(())
}

/// Least-used alive machine not already hosting this block.
fn replacement_for(
    world: &mut World,
    file: FileId,
    block: BlockId,
    block_size: u64,
) -> Result<Option<MachineId>> {
    let existing = world.dfs.files[file.0].blocks[block.0].clone();
    let candidate = world
        .dfs
        .ranking
        .iter()
        .copied()
        .find(|(_, machine)| !existing.contains(machine));
    let (usage, machine) = match candidate {
        Some(entry) => entry,
        None => return Ok(None),
    };
    world.dfs.ranking.remove(&(usage, machine));
    world.cluster.machines[machine.0]
        .drive
        .add_block(file, block, block_size)
        .map_err(|source| StoreError::Placement { file, block, machine, source })?;
    let usage = world.cluster.machines[machine.0].drive.used();
    world.dfs.ranking.insert((usage, machine));
    Ok(Some(machine))
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::config::{ClusterParams, ScenarioParams};
    use crate::scenario::World;
    use crate::sim::Scheduler;

    fn test_world(machine_count: usize, drive_capacity: u64) -> (World, Scheduler) {
        let params = ScenarioParams {
            cluster: ClusterParams {
                machine_count,
                drive_capacity,
                block_size: 100,
                ..ClusterParams::default()
            },
            computations: vec![],
            ..ScenarioParams::default()
        };
        let mut sched = Scheduler::new();
        let world = World::build(&params, &mut sched).unwrap();
        (world, sched)
    }

    fn assert_distinct(replicas: &[MachineId]) {
        assert_eq!(replicas.iter().unique().count(), replicas.len());
    }

    #[test]
    fn write_splits_into_blocks_with_distinct_replicas() {
        let (mut world, _sched) = test_world(5, u64::MAX);
        // 2.5 blocks round up to 3
        let file = write_file(&mut world, 250).unwrap();
        assert_eq!(world.dfs.file(file).block_count(), 3);
        for index in 0..3 {
            let replicas = world.dfs.file(file).replicas(BlockId(index));
            assert_eq!(replicas.len(), REPLICA_COUNT);
            assert_distinct(replicas);
        }
    }

    #[test]
    fn small_cluster_gets_one_replica_per_alive_machine() {
        let (mut world, _sched) = test_world(2, u64::MAX);
        let file = write_file(&mut world, 100).unwrap();
        let replicas = world.dfs.file(file).replicas(BlockId(0));
        assert_eq!(replicas.len(), 2);
        assert_distinct(replicas);
    }

    #[test]
    fn placement_prefers_least_used_drives() {
        let (mut world, _sched) = test_world(6, u64::MAX);
        write_file(&mut world, 200).unwrap();
        // 2 blocks x 3 replicas over 6 empty drives: every machine hosts
        // exactly one block
        for machine in world.cluster.machines() {
            assert_eq!(machine.drive().used(), 100);
        }
    }

    #[test]
    fn overflow_is_a_fatal_store_error() {
        let (mut world, _sched) = test_world(3, 100);
        // the second block cannot fit anywhere
        assert!(write_file(&mut world, 200).is_err());
    }

    #[test]
    fn failure_moves_replicas_to_alive_machines() {
        let (mut world, _sched) = test_world(5, u64::MAX);
        let file = write_file(&mut world, 250).unwrap();
        let failed = MachineId(1);
        world.cluster.machines[failed.0].alive = false;
        on_cluster_signal(&mut world, file, ClusterSignal::MachineFailed, failed).unwrap();
        for index in 0..3 {
            let replicas = world.dfs.file(file).replicas(BlockId(index));
            assert_eq!(replicas.len(), REPLICA_COUNT);
            assert_distinct(replicas);
            assert!(!replicas.contains(&failed));
        }
    }

    #[test]
    fn failure_below_replica_count_shrinks_the_set() {
        let (mut world, _sched) = test_world(3, u64::MAX);
        let file = write_file(&mut world, 100).unwrap();
        let failed = MachineId(0);
        world.cluster.machines[failed.0].alive = false;
        on_cluster_signal(&mut world, file, ClusterSignal::MachineFailed, failed).unwrap();
        let replicas = world.dfs.file(file).replicas(BlockId(0));
        // min(3, 2 alive) distinct machines
        assert_eq!(replicas.len(), 2);
        assert_distinct(replicas);
        assert!(!replicas.contains(&failed));
    }
}
