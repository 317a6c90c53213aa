//! Discrete-event simulation of a MapReduce-style compute cluster.
//!
//! A [`Scenario`] builds a fixed machine pool, a block-replicated distributed
//! store, and one or more map/reduce computations from a flat
//! [`ScenarioParams`] set, then drains a single time-ordered event queue to
//! completion. Machines fail at random, stragglers run slow, and the task
//! executors compensate with redundant instances; every interesting quantity
//! is sampled into a named record series and handed back as a
//! [`SimulationResult`].
//!
//! Runs are deterministic: the random source is seeded from
//! `ScenarioParams::seed`, and all same-timestamp work executes in a fixed
//! entity order.
//!
//! ```no_run
//! use mrsim::{Scenario, ScenarioParams};
//!
//! # fn main() -> mrsim::Result<()> {
//! let result = Scenario::new(ScenarioParams::default())?.run()?;
//! println!("finished at {}", result.duration());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
mod computation;
mod config;
pub mod output;
mod scenario;
pub mod sim;
mod types;
pub mod utils;

pub use crate::cluster::dfs::{StoreError, REPLICA_COUNT};
pub use crate::cluster::machine::ClusterError;
pub use crate::config::{ClusterParams, ComputationParams, ScenarioParams, DEFAULT_SEED};
pub use crate::scenario::Scenario;
pub use crate::sim::records::{HistoryEntry, Record, RecordValue};
pub use crate::sim::SimulationResult;
pub use crate::types::{
    BlockId, CompId, EventId, FileId, InstanceId, MachineId, Phase, SimDuration, SimTime, TaskId,
    TaskState,
};
pub use crate::utils::error::{Error, Result};

/// Build and run a scenario in one call.
pub fn run_scenario(params: ScenarioParams) -> Result<SimulationResult> {
    Scenario::new(params)?.run()
}
